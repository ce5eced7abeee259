//! Cassandra node control boundary contract.
//!
//! The core never speaks CQL or JMX itself; it consumes a tokenmap, a
//! schema string, snapshot directories, and start/stop control through
//! this port.

use crate::BoxFuture;
use ringvault_domain::TokenMap;
use ringvault_shared::{RequestContext, Result};
use std::path::PathBuf;

/// Post-restore health check selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Native transport only.
    Cql,
    /// Thrift transport only.
    Thrift,
    /// Both transports must accept requests.
    All,
}

/// One table snapshot directory found under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDir {
    /// Absolute path of the snapshot directory.
    pub path: PathBuf,
    /// Keyspace directory name.
    pub keyspace: String,
    /// Table directory name (may carry the table id suffix).
    pub table: String,
}

/// Boundary contract for controlling the local Cassandra node.
pub trait CassandraPort: Send + Sync {
    /// Take a snapshot and return its tag.
    fn create_snapshot(&self, ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>>;

    /// Clear a snapshot by tag. Must tolerate the snapshot being
    /// already cleared or never having existed.
    fn delete_snapshot(&self, ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>>;

    /// Find every per-table snapshot directory carrying `tag`,
    /// excluding reserved keyspaces.
    fn find_snapshot_dirs(
        &self,
        ctx: &RequestContext,
        tag: String,
    ) -> BoxFuture<'_, Result<Vec<SnapshotDir>>>;

    /// Dump the CQL schema of all user keyspaces.
    fn dump_schema(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<String>>;

    /// Capture the cluster tokenmap as seen by this node.
    fn tokenmap(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<TokenMap>>;

    /// Capture the cluster tokenmap as seen by a specific host.
    fn tokenmap_of(
        &self,
        ctx: &RequestContext,
        host: String,
    ) -> BoxFuture<'_, Result<TokenMap>>;

    /// Stop the node; already-stopped nodes are not an error.
    fn shutdown(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;

    /// Start the node letting it read its tokens from `system.local`.
    fn start_with_implicit_token(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;

    /// Start the node with explicit initial tokens and bootstrap
    /// disabled.
    fn start_with_tokens(
        &self,
        ctx: &RequestContext,
        tokens: Vec<String>,
    ) -> BoxFuture<'_, Result<()>>;

    /// Run the configured health check against a host.
    fn is_node_up(
        &self,
        ctx: &RequestContext,
        host: String,
        check: HealthCheck,
    ) -> BoxFuture<'_, Result<bool>>;

    /// Load the backup of one table into the node via sstableloader.
    fn load_sstables(
        &self,
        ctx: &RequestContext,
        table_dir: PathBuf,
    ) -> BoxFuture<'_, Result<()>>;

    /// The single configured data directory.
    fn data_root(&self) -> PathBuf;

    /// Numeric owner and group of the data root, so restored table
    /// directories can be chowned to match the rest of the data tree.
    /// `None` when the root cannot be inspected (or off Unix).
    #[cfg(unix)]
    fn data_root_ownership(&self) -> Option<(u32, u32)> {
        use std::os::unix::fs::MetadataExt;
        std::fs::metadata(self.data_root())
            .ok()
            .map(|metadata| (metadata.uid(), metadata.gid()))
    }

    /// Numeric owner and group of the data root, so restored table
    /// directories can be chowned to match the rest of the data tree.
    /// `None` when the root cannot be inspected (or off Unix).
    #[cfg(not(unix))]
    fn data_root_ownership(&self) -> Option<(u32, u32)> {
        None
    }

    /// The commitlog directory.
    fn commit_logs_path(&self) -> PathBuf;

    /// The saved-caches directory.
    fn saved_caches_path(&self) -> PathBuf;

    /// Live directory of one table under the data root.
    fn table_path(&self, keyspace: &str, table: &str) -> PathBuf {
        self.data_root().join(keyspace).join(table)
    }

    /// The fqdn this node answers to.
    fn fqdn(&self) -> &str;
}
