//! Backup catalog: node backups, cluster groupings, and the derived
//! index.

pub mod cluster;
pub mod index;
pub mod listing;
pub mod node;

pub use cluster::{ClusterBackup, ClusterMember};
pub use index::BuildIndexReport;
pub use listing::NodeBackupRecord;
pub use node::NodeBackup;

use ringvault_domain::{BackupLayout, BackupName, NodeFqdn};
use ringvault_ports::StoragePort;
use std::sync::Arc;

/// Entry point for catalog queries against one storage prefix.
#[derive(Clone)]
pub struct Catalog {
    storage: Arc<dyn StoragePort>,
    layout: BackupLayout,
}

impl Catalog {
    /// Create a catalog over a storage driver and layout.
    #[must_use]
    pub fn new(storage: Arc<dyn StoragePort>, layout: BackupLayout) -> Self {
        Self { storage, layout }
    }

    /// The storage driver behind this catalog.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StoragePort> {
        &self.storage
    }

    /// The layout behind this catalog.
    #[must_use]
    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    /// Handle to one node backup (no storage access).
    #[must_use]
    pub fn node_backup(&self, fqdn: &NodeFqdn, name: &BackupName) -> NodeBackup {
        NodeBackup::new(
            Arc::clone(&self.storage),
            self.layout.clone(),
            fqdn.clone(),
            name.clone(),
        )
    }

    /// Reduce a backend object name to a layout-relative path: strips
    /// the backend mount prefix and the cluster prefix.
    #[must_use]
    pub(crate) fn layout_relative(&self, object_name: &str) -> String {
        let backend_prefix = self.storage.path_prefix();
        let storage_relative = object_name
            .strip_prefix(&backend_prefix)
            .unwrap_or(object_name);
        self.layout.manifest_relative(storage_relative).to_owned()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Catalog")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
