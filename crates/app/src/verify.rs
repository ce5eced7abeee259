//! Read-only consistency checks of a cluster backup.

use crate::catalog::{Catalog, ClusterBackup};
use ringvault_domain::{BackupMode, BackupName, NodeFqdn};
use ringvault_shared::{hashes_match, RequestContext, Result};
use std::collections::BTreeMap;

/// A single problem found while cross-checking a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// The manifest references an object that is not in storage.
    Missing {
        /// Manifest-relative path.
        path: String,
    },
    /// Stored size differs from the manifest entry.
    WrongFileSize {
        /// Manifest-relative path.
        path: String,
        /// Size recorded in the manifest.
        expected: u64,
        /// Size reported by storage.
        actual: u64,
    },
    /// Stored digest differs from the manifest entry.
    WrongChecksum {
        /// Manifest-relative path.
        path: String,
    },
    /// A stored data object is absent from the manifest (full backups
    /// only; the incremental pool is shared).
    Unexpected {
        /// Backend object name.
        path: String,
    },
}

/// Result of verifying one backup name across the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Backup name.
    pub name: BackupName,
    /// Whether every ring node finished.
    pub complete: bool,
    /// Nodes that started but never finished.
    pub incomplete_nodes: Vec<String>,
    /// Ring nodes with no backup at all.
    pub missing_nodes: Vec<String>,
    /// Problems per node, in listing order.
    pub problems: Vec<(String, Problem)>,
}

impl VerifyReport {
    /// Returns true when the backup is complete and every manifest
    /// entry checked out.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.complete && self.problems.is_empty()
    }
}

/// Verify a cluster backup: completion plus per-object existence,
/// size, and checksum. Every problem is collected; the check never
/// stops at the first finding.
pub async fn verify_backup(
    ctx: &RequestContext,
    catalog: &Catalog,
    name: &BackupName,
) -> Result<VerifyReport> {
    let cluster: ClusterBackup = catalog.get_cluster_backup(ctx, name).await?;

    let mut report = VerifyReport {
        name: name.clone(),
        complete: cluster.is_complete(),
        incomplete_nodes: cluster
            .incomplete_nodes()
            .iter()
            .map(|member| member.fqdn.clone())
            .collect(),
        missing_nodes: cluster.missing_nodes(),
        problems: Vec::new(),
    };

    for member in &cluster.members {
        if member.finished_ms.is_none() {
            continue;
        }
        let Ok(fqdn) = NodeFqdn::parse(&member.fqdn) else {
            continue;
        };
        let problems = validate_manifest(ctx, catalog, &fqdn, name).await?;
        for problem in problems {
            report.problems.push((member.fqdn.clone(), problem));
        }
    }

    Ok(report)
}

/// Cross-check one node's manifest against its data-path listing.
async fn validate_manifest(
    ctx: &RequestContext,
    catalog: &Catalog,
    fqdn: &NodeFqdn,
    name: &BackupName,
) -> Result<Vec<Problem>> {
    let backup = catalog.node_backup(fqdn, name);
    let manifest = backup.manifest(ctx).await?;
    let is_incremental = backup.is_incremental(ctx).await?;
    let mode = if is_incremental {
        BackupMode::Incremental
    } else {
        BackupMode::Full
    };

    let data_dir = backup.data_dir(mode);
    let listing = catalog
        .storage()
        .list(ctx, format!("{data_dir}/"))
        .await?;
    let backend_prefix = catalog.storage().path_prefix();
    let objects_in_storage: BTreeMap<String, (u64, String)> = listing
        .into_iter()
        .map(|object| (object.name.clone(), (object.size, object.hash)))
        .collect();

    let mut problems = Vec::new();
    let mut paths_in_manifest = Vec::new();
    for object in manifest.objects() {
        let storage_relative = catalog.layout().join(&object.path);
        let expected_name = format!("{backend_prefix}{storage_relative}");
        paths_in_manifest.push(expected_name.clone());

        let found = match objects_in_storage.get(&expected_name) {
            Some((size, hash)) => Some((*size, hash.clone())),
            // A cache hit may reference an object under a previous
            // backup's prefix; resolve those individually.
            None => match catalog.storage().get(ctx, storage_relative).await {
                Ok(stored) => Some((stored.size, stored.hash)),
                Err(error) if error.is_not_found() => None,
                Err(error) => return Err(error),
            },
        };

        let Some((size, hash)) = found else {
            problems.push(Problem::Missing {
                path: object.path.clone(),
            });
            continue;
        };
        if size != object.size {
            problems.push(Problem::WrongFileSize {
                path: object.path.clone(),
                expected: object.size,
                actual: size,
            });
            continue;
        }
        if !hashes_match(&object.md5, &hash) {
            problems.push(Problem::WrongChecksum {
                path: object.path.clone(),
            });
        }
    }

    // Extra objects are only meaningful for full backups; the shared
    // incremental pool legitimately holds other backups' files.
    if !is_incremental {
        for stored_name in objects_in_storage.keys() {
            if !paths_in_manifest.contains(stored_name) {
                problems.push(Problem::Unexpected {
                    path: stored_name.clone(),
                });
            }
        }
    }

    Ok(problems)
}
