//! # ringvault-ports
//!
//! Port traits for the ringvault hexagonal architecture.
//!
//! This crate defines the interfaces between the domain and
//! infrastructure layers. It depends only on `domain` and `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
///
/// Boundary traits are I/O-bound, so boxed futures are fine here;
/// batch APIs cover the hot paths where allocation would matter.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod cassandra;
pub mod logger;
pub mod monitoring;
pub mod prompt;
pub mod remote;
pub mod storage;

pub use cassandra::{CassandraPort, HealthCheck, SnapshotDir};
pub use logger::{fields, LogFields, LogLevel, LoggerPort};
pub use monitoring::{MonitoringPort, NoopMonitoring};
pub use prompt::{BypassPrompt, PromptPort};
pub use remote::{RemoteExecPort, RemoteHandle, RemoteStatus};
pub use storage::{StoragePort, StoredObject};

// Re-export selected domain types used in port signatures, so adapter
// crates can implement ports without directly depending on the domain
// crate.
pub use ringvault_domain::{BackupLayout, BackupMode, Manifest, ManifestObject, TokenMap};
