//! Configuration schema, defaults, validation, and normalization.
//!
//! The config file is TOML with one section per concern. Parsing uses
//! `serde`; validation is manual and returns typed errors mapped to
//! `ErrorEnvelope`.

use ringvault_ports::HealthCheck;
use ringvault_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    /// Google Cloud Storage.
    Gcs,
    /// Local filesystem bucket.
    Local,
}

impl StorageProvider {
    /// Wire name of the provider.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gcs => "gcs",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Backend selection: `gcs` or `local`. Mandatory.
    pub storage_provider: String,
    /// Bucket (or local bucket directory name). Mandatory.
    pub bucket_name: String,
    /// Cluster prefix inside the bucket.
    pub prefix: String,
    /// Mount root for the local backend.
    pub base_path: String,
    /// Service-account key file for cloud backends.
    pub key_file: String,
    /// Fqdn this node acts as; defaults to the host name.
    pub fqdn: String,
    /// Field separator of the host-list file.
    pub host_file_separator: String,
    /// Purge: maximum backup age in days (0 disables).
    pub max_backup_age: u32,
    /// Purge: maximum backups kept per node (0 disables).
    pub max_backup_count: u32,
    /// Backend API profile name.
    pub api_profile: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_provider: String::new(),
            bucket_name: String::new(),
            prefix: String::new(),
            base_path: "/tmp".to_owned(),
            key_file: String::new(),
            fqdn: default_fqdn(),
            host_file_separator: ",".to_owned(),
            max_backup_age: 0,
            max_backup_count: 0,
            api_profile: "default".to_owned(),
        }
    }
}

fn default_fqdn() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

/// `[cassandra]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CassandraConfig {
    /// Command that starts the node.
    pub start_cmd: String,
    /// Command that stops the node.
    pub stop_cmd: String,
    /// Path of `cassandra.yaml`.
    pub config_file: String,
    /// CQL user name, when authentication is enabled.
    pub cql_username: String,
    /// CQL password, when authentication is enabled.
    pub cql_password: String,
    /// Command used to probe a running node.
    pub check_running: String,
    /// Non-zero when the node is a ccm test cluster member.
    pub is_ccm: u32,
    /// sstableloader binary.
    pub sstableloader_bin: String,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            start_cmd: "sudo /etc/init.d/cassandra start".to_owned(),
            stop_cmd: "sudo /etc/init.d/cassandra stop".to_owned(),
            config_file: "/etc/cassandra/cassandra.yaml".to_owned(),
            cql_username: String::new(),
            cql_password: String::new(),
            check_running: "nodetool version".to_owned(),
            is_ccm: 0,
            sstableloader_bin: "sstableloader".to_owned(),
        }
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SshConfig {
    /// Remote user name.
    pub username: String,
    /// Private key file.
    pub key_file: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_default(),
            key_file: String::new(),
        }
    }
}

/// `[restore]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RestoreConfig {
    /// Post-restore health check: `cql`, `thrift`, or `all`.
    pub health_check: String,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            health_check: "cql".to_owned(),
        }
    }
}

/// `[monitoring]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitoringConfig {
    /// Metric emitter selection (`none` or `log`).
    pub monitoring_provider: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_provider: "none".to_owned(),
        }
    }
}

/// Top-level ringvault configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Storage backend settings.
    pub storage: StorageConfig,
    /// Cassandra control settings.
    pub cassandra: CassandraConfig,
    /// SSH fan-out settings.
    pub ssh: SshConfig,
    /// Restore behavior settings.
    pub restore: RestoreConfig,
    /// Monitoring settings.
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Validate and normalize the config.
    pub fn validate(self) -> Result<ValidatedConfig, ErrorEnvelope> {
        let provider = parse_provider(&self.storage.storage_provider)?;

        if self.storage.bucket_name.trim().is_empty() {
            return Err(missing("storage", "bucket_name"));
        }
        if self.storage.fqdn.trim().is_empty() {
            return Err(missing("storage", "fqdn"));
        }
        if self.storage.host_file_separator.is_empty() {
            return Err(missing("storage", "host_file_separator"));
        }
        if self.cassandra.start_cmd.trim().is_empty() {
            return Err(missing("cassandra", "start_cmd"));
        }
        if self.cassandra.stop_cmd.trim().is_empty() {
            return Err(missing("cassandra", "stop_cmd"));
        }
        if provider == StorageProvider::Local && self.storage.base_path.trim().is_empty() {
            return Err(missing("storage", "base_path"));
        }

        let health_check = parse_health_check(&self.restore.health_check)?;

        Ok(ValidatedConfig {
            raw: self,
            provider,
            health_check,
        })
    }
}

fn missing(section: &str, field: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::config_invalid(),
        format!("required configuration \"{field}\" is missing in [{section}] section"),
    )
    .with_metadata("section", section)
    .with_metadata("field", field)
}

fn parse_provider(raw: &str) -> Result<StorageProvider, ErrorEnvelope> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "gcs" | "google_storage" => Ok(StorageProvider::Gcs),
        "local" => Ok(StorageProvider::Local),
        "" => Err(missing("storage", "storage_provider")),
        other => Err(ErrorEnvelope::expected(
            ErrorCode::config_invalid(),
            format!("unsupported storage provider: {other}"),
        )
        .with_metadata("storage_provider", other)),
    }
}

fn parse_health_check(raw: &str) -> Result<HealthCheck, ErrorEnvelope> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "cql" => Ok(HealthCheck::Cql),
        "thrift" => Ok(HealthCheck::Thrift),
        "all" => Ok(HealthCheck::All),
        other => Err(ErrorEnvelope::expected(
            ErrorCode::config_invalid(),
            format!("unsupported health check: {other}"),
        )
        .with_metadata("health_check", other)),
    }
}

/// Validated config wrapper carrying parsed enum values.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    raw: Config,
    provider: StorageProvider,
    health_check: HealthCheck,
}

impl ValidatedConfig {
    /// The parsed storage provider.
    #[must_use]
    pub const fn provider(&self) -> StorageProvider {
        self.provider
    }

    /// The parsed health check selection.
    #[must_use]
    pub const fn health_check(&self) -> HealthCheck {
        self.health_check
    }

    /// Borrow the raw config.
    #[must_use]
    pub const fn as_raw(&self) -> &Config {
        &self.raw
    }
}

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let mut config = Config::default();
        config.storage.storage_provider = "local".to_owned();
        config.storage.bucket_name = "ringvault-test".to_owned();
        config.storage.fqdn = "n1.example.com".to_owned();
        config
    }

    #[test]
    fn minimal_local_config_validates() {
        let validated = minimal().validate().expect("config should validate");
        assert_eq!(validated.provider(), StorageProvider::Local);
        assert_eq!(validated.health_check(), HealthCheck::Cql);
        assert_eq!(validated.storage.host_file_separator, ",");
    }

    #[test]
    fn bucket_name_is_mandatory() {
        let mut config = minimal();
        config.storage.bucket_name = String::new();
        let error = config.validate().expect_err("missing bucket must fail");
        assert_eq!(error.code, ErrorCode::config_invalid());
        assert_eq!(error.metadata.get("field").map(String::as_str), Some("bucket_name"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = minimal();
        config.storage.storage_provider = "s3".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn health_check_values_parse() {
        for (raw, expected) in [
            ("cql", HealthCheck::Cql),
            ("thrift", HealthCheck::Thrift),
            ("all", HealthCheck::All),
        ] {
            let mut config = minimal();
            config.restore.health_check = raw.to_owned();
            assert_eq!(
                config.validate().expect("valid health check").health_check(),
                expected
            );
        }

        let mut config = minimal();
        config.restore.health_check = "udp".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_match_the_operational_baseline() {
        let config = Config::default();
        assert_eq!(config.cassandra.check_running, "nodetool version");
        assert_eq!(config.cassandra.sstableloader_bin, "sstableloader");
        assert_eq!(config.storage.max_backup_age, 0);
        assert_eq!(config.storage.max_backup_count, 0);
        assert_eq!(config.monitoring.monitoring_provider, "none");
    }
}
