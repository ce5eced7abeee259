//! Status summary of one cluster backup.

use crate::catalog::Catalog;
use ringvault_domain::{BackupName, NodeFqdn};
use ringvault_shared::{RequestContext, Result};

/// Aggregated status of a cluster backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Backup name.
    pub name: BackupName,
    /// Whether every ring node finished.
    pub complete: bool,
    /// Earliest member start.
    pub started_ms: Option<u64>,
    /// Latest member finish (complete backups only).
    pub finished_ms: Option<u64>,
    /// Nodes that finished.
    pub complete_nodes: usize,
    /// Nodes that started but never finished.
    pub incomplete_nodes: usize,
    /// Ring nodes with no backup.
    pub missing_nodes: usize,
    /// Total objects across member manifests.
    pub objects: usize,
    /// Total referenced bytes across member manifests.
    pub total_size: u64,
}

/// Compute the status of one backup name.
pub async fn backup_status(
    ctx: &RequestContext,
    catalog: &Catalog,
    name: &BackupName,
) -> Result<StatusReport> {
    let cluster = catalog.get_cluster_backup(ctx, name).await?;

    let mut objects = 0usize;
    let mut total_size = 0u64;
    for member in &cluster.members {
        if member.finished_ms.is_none() {
            continue;
        }
        let Ok(fqdn) = NodeFqdn::parse(&member.fqdn) else {
            continue;
        };
        let backup = catalog.node_backup(&fqdn, name);
        match backup.manifest(ctx).await {
            Ok(manifest) => {
                objects += manifest.object_count();
                total_size += manifest.total_size();
            },
            Err(error) if error.is_not_found() => {},
            Err(error) => return Err(error),
        }
    }

    Ok(StatusReport {
        name: name.clone(),
        complete: cluster.is_complete(),
        started_ms: cluster.started_ms(),
        finished_ms: cluster.finished_ms(),
        complete_nodes: cluster.complete_nodes().len(),
        incomplete_nodes: cluster.incomplete_nodes().len(),
        missing_nodes: cluster.missing_nodes().len(),
        objects,
        total_size,
    })
}

/// Render a byte count the way operators read it.
#[must_use]
pub fn format_bytes(value: u64) -> String {
    let mut shift = 0u32;
    for unit_shift in 0..5u32 {
        shift = unit_shift;
        if value >> (unit_shift * 10) < 1024 {
            break;
        }
    }
    let unit = ["B", "KB", "MB", "GB", "TB"][shift as usize];
    let scaled = value as f64 / (1u64 << (shift * 10)) as f64;
    format!("{scaled:.2} {unit}")
}
