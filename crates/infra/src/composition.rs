//! Composition root: wire adapters into an application context.

use crate::storage_factory::build_storage;
use ringvault_adapters::{
    CassandraNode, CassandraNodeConfig, JsonLogger, LogMonitoring, Ssh2Remote, SshCredentials,
    StderrSink, StdinPrompt,
};
use ringvault_app::Catalog;
use ringvault_config::ValidatedConfig;
use ringvault_domain::{BackupLayout, NodeFqdn};
use ringvault_ports::{
    BypassPrompt, CassandraPort, HealthCheck, LogLevel, LoggerPort, MonitoringPort,
    NoopMonitoring, PromptPort, RemoteExecPort,
};
use ringvault_shared::{ErrorEnvelope, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a CLI verb needs, wired from the validated config.
pub struct AppContext {
    /// Backup catalog over the configured storage driver.
    pub catalog: Catalog,
    /// The node this process acts as.
    pub fqdn: NodeFqdn,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Metric emitter per `monitoring_provider`.
    pub monitoring: Arc<dyn MonitoringPort>,
    /// Health check selection for restores.
    pub health_check: HealthCheck,
    /// Validated configuration.
    pub config: ValidatedConfig,
}

impl AppContext {
    /// Build the storage-facing context (no node control needed).
    pub async fn build(config: ValidatedConfig, verbose: bool) -> Result<Self> {
        let logger: Arc<dyn LoggerPort> = Arc::new(if verbose {
            JsonLogger::new(StderrSink).with_min_level(LogLevel::Debug)
        } else {
            JsonLogger::new(StderrSink)
        });
        let monitoring: Arc<dyn MonitoringPort> =
            match config.monitoring.monitoring_provider.as_str() {
                "log" => Arc::new(LogMonitoring::new(Arc::clone(&logger))),
                _ => Arc::new(NoopMonitoring),
            };

        let storage = build_storage(&config).await?;
        let layout = BackupLayout::new(&config.storage.prefix);
        let fqdn = NodeFqdn::parse(&config.storage.fqdn).map_err(ErrorEnvelope::from)?;
        let health_check = config.health_check();

        Ok(Self {
            catalog: Catalog::new(storage, layout),
            fqdn,
            logger,
            monitoring,
            health_check,
            config,
        })
    }

    /// Build the Cassandra control adapter for node-local verbs.
    pub fn cassandra(&self) -> Result<Arc<dyn CassandraPort>> {
        let node = CassandraNode::new(CassandraNodeConfig {
            start_cmd: self.config.cassandra.start_cmd.clone(),
            stop_cmd: self.config.cassandra.stop_cmd.clone(),
            config_file: PathBuf::from(&self.config.cassandra.config_file),
            cql_username: self.config.cassandra.cql_username.clone(),
            cql_password: self.config.cassandra.cql_password.clone(),
            is_ccm: self.config.cassandra.is_ccm,
            sstableloader_bin: self.config.cassandra.sstableloader_bin.clone(),
            fqdn: self.fqdn.to_string(),
        })?;
        Ok(Arc::new(node))
    }

    /// Build the SSH remote executor for cluster verbs.
    #[must_use]
    pub fn remote(&self) -> Arc<dyn RemoteExecPort> {
        Arc::new(Ssh2Remote::new(SshCredentials {
            username: self.config.ssh.username.clone(),
            key_file: PathBuf::from(&self.config.ssh.key_file),
        }))
    }

    /// Operator prompt: interactive, or auto-confirming with `-y`.
    #[must_use]
    pub fn prompt(&self, bypass_checks: bool) -> Arc<dyn PromptPort> {
        if bypass_checks {
            Arc::new(BypassPrompt)
        } else {
            Arc::new(StdinPrompt)
        }
    }
}
