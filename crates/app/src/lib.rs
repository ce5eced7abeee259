//! # ringvault-app
//!
//! Use-cases of the ringvault backup tool: the per-node backup
//! pipeline with its dedup cache, the backup catalog and derived
//! index, node and cluster restore, verification, retention, and
//! reporting. Everything here talks to the outside world through the
//! port traits only.

pub mod backup_cache;
pub mod backup_node;
pub mod catalog;
pub mod download;
pub mod fetch;
pub mod listing;
pub mod purge;
pub mod report;
pub mod restore_cluster;
pub mod restore_node;
pub mod status;
pub mod verify;

pub use backup_cache::{NodeBackupCache, Retained};
pub use backup_node::{backup_node, BackupNodeDeps, BackupNodeInput, BackupNodeReport};
pub use catalog::{
    BuildIndexReport, Catalog, ClusterBackup, ClusterMember, NodeBackup, NodeBackupRecord,
};
pub use download::download_backup;
pub use fetch::fetch_tokenmap;
pub use listing::{list_backups, BackupListEntry};
pub use purge::{purge, PurgePolicy, PurgeReport};
pub use report::{
    latest_complete_cluster_backup, report_last_backup, BackupFreshness, ReportDeps,
};
pub use restore_cluster::{
    map_in_place, parse_host_list, restore_cluster, HostMapping, RestoreClusterDeps,
    RestoreClusterInput, RestoreClusterReport, RestoreTargets,
};
pub use restore_node::{restore_node, RestoreNodeDeps, RestoreNodeInput};
pub use status::{backup_status, format_bytes, StatusReport};
pub use verify::{verify_backup, Problem, VerifyReport};
