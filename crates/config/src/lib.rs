//! # ringvault-config
//!
//! Configuration schema, defaults, validation, and loading for the
//! ringvault workspace. The file format is TOML with one section per
//! concern (`[storage]`, `[cassandra]`, `[ssh]`, `[restore]`,
//! `[monitoring]`); CLI flags override file values before validation.

#![deny(clippy::unwrap_used)]

pub mod load;
pub mod schema;

pub use load::{load_config, load_config_str, ConfigOverrides, DEFAULT_CONFIG_PATH};
pub use schema::{
    CassandraConfig, Config, MonitoringConfig, RestoreConfig, SshConfig, StorageConfig,
    StorageProvider, ValidatedConfig,
};
