//! Cluster backup listing for the CLI.

use crate::catalog::Catalog;
use ringvault_domain::NodeFqdn;
use ringvault_shared::{RequestContext, Result};

/// One row of `list-backups`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupListEntry {
    /// Backup name.
    pub name: String,
    /// Earliest member start.
    pub started_ms: Option<u64>,
    /// Latest member finish; `None` renders as incomplete.
    pub finished_ms: Option<u64>,
    /// Members seen so far.
    pub nodes: usize,
    /// Ring size at backup time.
    pub ring_size: usize,
}

/// List cluster backups; without `show_all` only backups this node
/// participates in are shown.
pub async fn list_backups(
    ctx: &RequestContext,
    catalog: &Catalog,
    fqdn: &NodeFqdn,
    show_all: bool,
) -> Result<Vec<BackupListEntry>> {
    let clusters = catalog.list_cluster_backups(ctx).await?;
    let mut entries = Vec::new();
    for cluster in clusters {
        if !show_all
            && !cluster
                .members
                .iter()
                .any(|member| member.fqdn == fqdn.as_str())
        {
            continue;
        }
        entries.push(BackupListEntry {
            name: cluster.name.to_string(),
            started_ms: cluster.started_ms(),
            finished_ms: cluster.finished_ms(),
            nodes: cluster.members.len(),
            ring_size: cluster.tokenmap.len(),
        });
    }
    Ok(entries)
}
