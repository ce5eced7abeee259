//! Retention: drop old backups by age and per-node count.

use crate::catalog::{Catalog, NodeBackupRecord};
use ringvault_ports::{fields, LoggerPort};
use ringvault_shared::{RequestContext, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// Composed retention policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgePolicy {
    /// Drop finished backups older than this many days (0 disables).
    pub max_backup_age_days: u32,
    /// Keep at most this many finished backups per node (0 disables).
    pub max_backup_count: u32,
}

/// Outcome of a purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// `(fqdn, name)` pairs removed.
    pub deleted_backups: Vec<(String, String)>,
    /// Objects deleted from storage.
    pub deleted_objects: usize,
}

/// Apply the retention policy against the authoritative backup set.
///
/// Full backups lose everything under their own prefix. Incremental
/// backups only lose pool objects that no surviving incremental
/// backup still references. Index entries always go away with the
/// backup.
pub async fn purge(
    ctx: &RequestContext,
    catalog: &Catalog,
    logger: &Arc<dyn LoggerPort>,
    policy: PurgePolicy,
    now_ms: u64,
) -> Result<PurgeReport> {
    let records = catalog.discover_node_backups(ctx).await?;

    let mut by_fqdn: BTreeMap<String, Vec<NodeBackupRecord>> = BTreeMap::new();
    for record in records {
        by_fqdn
            .entry(record.fqdn.to_string())
            .or_default()
            .push(record);
    }

    let mut report = PurgeReport::default();
    for (fqdn, mut node_records) in by_fqdn {
        node_records.sort_by_key(|record| record.started_ms);
        let doomed = select_doomed(&node_records, policy, now_ms);
        if doomed.is_empty() {
            continue;
        }

        let survivors: Vec<&NodeBackupRecord> = node_records
            .iter()
            .filter(|record| !doomed.contains(record.name.as_str()))
            .collect();

        // Pool objects still referenced by any surviving incremental
        // backup must outlive the purge.
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        for survivor in &survivors {
            let backup = catalog.node_backup(&survivor.fqdn, &survivor.name);
            if survivor.finished_ms.is_none() {
                continue;
            }
            if !backup.is_incremental(ctx).await? {
                continue;
            }
            let manifest = backup.manifest(ctx).await?;
            referenced.extend(manifest.objects().map(|object| object.path.clone()));
        }

        for record in node_records
            .iter()
            .filter(|record| doomed.contains(record.name.as_str()))
        {
            let backup = catalog.node_backup(&record.fqdn, &record.name);
            let incremental =
                record.finished_ms.is_some() && backup.is_incremental(ctx).await?;

            if incremental {
                let manifest = backup.manifest(ctx).await?;
                for object in manifest.objects() {
                    if !referenced.contains(&object.path) {
                        catalog
                            .storage()
                            .delete(ctx, catalog.layout().join(&object.path))
                            .await?;
                        report.deleted_objects += 1;
                    }
                }
            }

            // Everything under the backup's own prefix goes away: for
            // full backups that includes the data objects, for
            // incremental backups just the meta files.
            let root = catalog
                .layout()
                .node_root(&record.fqdn, &record.name);
            let owned = catalog
                .storage()
                .list(ctx, format!("{root}/"))
                .await?;
            for object in owned {
                let relative = catalog.layout_relative(&object.name);
                catalog
                    .storage()
                    .delete(ctx, catalog.layout().join(&relative))
                    .await?;
                report.deleted_objects += 1;
            }

            report.deleted_objects += catalog
                .delete_index_entries(ctx, &record.fqdn, &record.name)
                .await?;
            logger.info(
                "purge.deleted",
                &format!("purged backup {} of {fqdn}", record.name),
                Some(fields(&[("backup", record.name.as_str()), ("fqdn", &fqdn)])),
            );
            report
                .deleted_backups
                .push((fqdn.clone(), record.name.to_string()));
        }
    }

    Ok(report)
}

/// Names to drop for one node, by age then by count.
fn select_doomed(
    records: &[NodeBackupRecord],
    policy: PurgePolicy,
    now_ms: u64,
) -> BTreeSet<String> {
    let mut doomed = BTreeSet::new();

    if policy.max_backup_age_days > 0 {
        let cutoff = now_ms.saturating_sub(u64::from(policy.max_backup_age_days) * DAY_MS);
        for record in records {
            if let Some(finished_ms) = record.finished_ms {
                if finished_ms < cutoff {
                    doomed.insert(record.name.to_string());
                }
            }
        }
    }

    if policy.max_backup_count > 0 {
        let mut finished: Vec<&NodeBackupRecord> = records
            .iter()
            .filter(|record| record.finished_ms.is_some())
            .collect();
        finished.sort_by_key(|record| std::cmp::Reverse(record.started_ms));
        for record in finished.iter().skip(policy.max_backup_count as usize) {
            doomed.insert(record.name.to_string());
        }
    }

    doomed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringvault_domain::{BackupName, NodeFqdn};

    fn record(name: &str, started_ms: u64, finished_ms: Option<u64>) -> NodeBackupRecord {
        NodeBackupRecord {
            fqdn: NodeFqdn::parse("n1").expect("fqdn"),
            name: BackupName::parse(name).expect("name"),
            started_ms: Some(started_ms),
            finished_ms,
        }
    }

    #[test]
    fn age_policy_drops_old_finished_backups() {
        let records = vec![
            record("old", 1_000, Some(1_000)),
            record("new", 2_000, Some(10 * DAY_MS)),
        ];
        let policy = PurgePolicy {
            max_backup_age_days: 7,
            max_backup_count: 0,
        };
        let doomed = select_doomed(&records, policy, 15 * DAY_MS);
        assert!(doomed.contains("old"));
        assert!(!doomed.contains("new"));
    }

    #[test]
    fn unfinished_backups_are_not_aged_out() {
        let records = vec![record("partial", 1_000, None)];
        let policy = PurgePolicy {
            max_backup_age_days: 1,
            max_backup_count: 0,
        };
        assert!(select_doomed(&records, policy, 100 * DAY_MS).is_empty());
    }

    #[test]
    fn count_policy_keeps_the_newest() {
        let records = vec![
            record("bk1", 1_000, Some(1_500)),
            record("bk2", 2_000, Some(2_500)),
            record("bk3", 3_000, Some(3_500)),
        ];
        let policy = PurgePolicy {
            max_backup_age_days: 0,
            max_backup_count: 2,
        };
        let doomed = select_doomed(&records, policy, 10_000);
        assert_eq!(doomed.into_iter().collect::<Vec<_>>(), vec!["bk1"]);
    }

    #[test]
    fn zero_policy_keeps_everything() {
        let records = vec![record("bk1", 1_000, Some(1_500))];
        assert!(select_doomed(&records, PurgePolicy::default(), u64::MAX).is_empty());
    }
}
