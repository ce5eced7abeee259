//! Config file loading and CLI override merging.

use crate::schema::{Config, ValidatedConfig};
use ringvault_shared::{ErrorCode, ErrorEnvelope, Result};
use std::path::Path;

/// Default configuration path probed when no file is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ringvault/ringvault.toml";

/// Flag-level overrides applied on top of the file config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Override `[storage] bucket_name`.
    pub bucket_name: Option<String>,
    /// Override `[storage] prefix`.
    pub prefix: Option<String>,
    /// Override `[storage] key_file`.
    pub key_file: Option<String>,
    /// Act as another host.
    pub fqdn: Option<String>,
    /// Override `[ssh] username`.
    pub ssh_username: Option<String>,
    /// Override `[ssh] key_file`.
    pub ssh_key_file: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(value) = &self.bucket_name {
            config.storage.bucket_name = value.clone();
        }
        if let Some(value) = &self.prefix {
            config.storage.prefix = value.clone();
        }
        if let Some(value) = &self.key_file {
            config.storage.key_file = value.clone();
        }
        if let Some(value) = &self.fqdn {
            config.storage.fqdn = value.clone();
        }
        if let Some(value) = &self.ssh_username {
            config.ssh.username = value.clone();
        }
        if let Some(value) = &self.ssh_key_file {
            config.ssh.key_file = value.clone();
        }
    }
}

/// Parse a TOML document into a validated config.
pub fn load_config_str(raw: &str, overrides: &ConfigOverrides) -> Result<ValidatedConfig> {
    let mut config: Config = toml::from_str(raw).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::config_invalid(),
            format!("configuration is not valid TOML: {error}"),
        )
    })?;
    overrides.apply(&mut config);
    config.validate()
}

/// Load the config from an explicit path, or the default location.
///
/// An explicit path that does not exist is an error; when no path is
/// given and the default file is absent, that is an error too (the
/// tool has nothing to act on without storage settings).
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ValidatedConfig> {
    let effective = match path {
        Some(path) => path.to_path_buf(),
        None => Path::new(DEFAULT_CONFIG_PATH).to_path_buf(),
    };

    let raw = std::fs::read_to_string(&effective).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::config_invalid(),
            format!(
                "cannot read configuration file {}: {error}",
                effective.display()
            ),
        )
        .with_metadata("path", effective.display().to_string())
    })?;
    load_config_str(&raw, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[storage]
storage_provider = "local"
bucket_name = "ringvault-it"
base_path = "/var/lib/ringvault"
fqdn = "n1.example.com"
max_backup_age = 7
max_backup_count = 3

[cassandra]
start_cmd = "systemctl start cassandra"
stop_cmd = "systemctl stop cassandra"

[restore]
health_check = "all"
"#;

    #[test]
    fn toml_sections_map_onto_the_schema() {
        let config =
            load_config_str(SAMPLE, &ConfigOverrides::default()).expect("sample should load");
        assert_eq!(config.storage.bucket_name, "ringvault-it");
        assert_eq!(config.storage.max_backup_age, 7);
        assert_eq!(config.cassandra.start_cmd, "systemctl start cassandra");
        assert_eq!(config.monitoring.monitoring_provider, "none");
    }

    #[test]
    fn overrides_win_over_the_file() {
        let overrides = ConfigOverrides {
            bucket_name: Some("other-bucket".to_owned()),
            fqdn: Some("n9.example.com".to_owned()),
            ..ConfigOverrides::default()
        };
        let config = load_config_str(SAMPLE, &overrides).expect("sample should load");
        assert_eq!(config.storage.bucket_name, "other-bucket");
        assert_eq!(config.storage.fqdn, "n9.example.com");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = "[storage]\nstorage_provider = \"local\"\nbucket = \"typo\"\n";
        assert!(load_config_str(raw, &ConfigOverrides::default()).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_config(
            Some(Path::new("/nonexistent/ringvault.toml")),
            &ConfigOverrides::default(),
        );
        assert!(matches!(result, Err(error) if error.code == ErrorCode::config_invalid()));
    }
}
