//! Backup freshness reporting and metric emission.

use crate::catalog::{Catalog, ClusterBackup};
use ringvault_ports::{fields, LoggerPort, MonitoringPort};
use ringvault_shared::{RequestContext, Result};
use std::sync::Arc;
use std::time::Duration;

const NODE_BACKUP_METRIC: &str = "ringvault-node-backup";
const CLUSTER_BACKUP_METRIC: &str = "ringvault-cluster-backup";

/// Sentinel pushed when reporting itself keeps failing, far in the
/// past so freshness alerts fire.
const TRACKING_ERROR_SECONDS: i64 = 315_365_400;

/// Dependencies of the reporter.
pub struct ReportDeps {
    /// Backup catalog.
    pub catalog: Catalog,
    /// Node the report runs on.
    pub fqdn: ringvault_domain::NodeFqdn,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Metric emitter used with `--push-metrics`.
    pub monitoring: Arc<dyn MonitoringPort>,
    /// Attempts before giving up (3 in production).
    pub attempts: u32,
    /// Delay between attempts (15 s in production).
    pub retry_delay: Duration,
}

/// Freshness summary printed by `report-last-backup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupFreshness {
    /// Seconds since this node's latest finished backup.
    pub node_seconds_ago: Option<i64>,
    /// Name of the node's latest backup.
    pub node_backup_name: Option<String>,
    /// Name of the latest complete cluster backup.
    pub complete_cluster_backup: Option<String>,
    /// Seconds since the latest complete cluster backup finished.
    pub cluster_seconds_ago: Option<i64>,
    /// Latest cluster backup (complete or not) node counts:
    /// `(complete, incomplete, missing)`.
    pub latest_node_counts: Option<(usize, usize, usize)>,
}

/// Report the time since the last backups, optionally pushing metrics.
///
/// Reporting retries a few times; when it keeps failing and metrics
/// were requested, the tracking-error sentinel is pushed instead so
/// the broken monitoring itself raises an alert.
pub async fn report_last_backup(
    ctx: &RequestContext,
    deps: &ReportDeps,
    push_metrics: bool,
    now_ms: u64,
) -> Result<BackupFreshness> {
    let mut last_error = None;
    for attempt in 0..deps.attempts.max(1) {
        match compute_freshness(ctx, deps, push_metrics, now_ms).await {
            Ok(freshness) => return Ok(freshness),
            Err(error) => {
                deps.logger.warn(
                    "report.attempt_failed",
                    &format!("report attempt {} failed: {error}", attempt + 1),
                    None,
                );
                last_error = Some(error);
                if attempt + 1 < deps.attempts {
                    tokio::time::sleep(deps.retry_delay).await;
                }
            },
        }
    }

    if push_metrics {
        deps.monitoring.send(
            CLUSTER_BACKUP_METRIC,
            "seconds-since-backup",
            "TRACKING-ERROR",
            TRACKING_ERROR_SECONDS,
        );
    }
    Err(last_error.unwrap_or_else(|| {
        ringvault_shared::ErrorEnvelope::invariant(
            ringvault_shared::ErrorCode::internal(),
            "report failed without an error",
        )
    }))
}

async fn compute_freshness(
    ctx: &RequestContext,
    deps: &ReportDeps,
    push_metrics: bool,
    now_ms: u64,
) -> Result<BackupFreshness> {
    let mut freshness = BackupFreshness::default();

    if let Some(latest) = deps.catalog.latest_node_backup(ctx, &deps.fqdn).await? {
        if let Some(finished_ms) = latest.finished_ms {
            let seconds_ago = seconds_between(finished_ms, now_ms);
            freshness.node_seconds_ago = Some(seconds_ago);
            freshness.node_backup_name = Some(latest.name.to_string());
            if push_metrics {
                deps.monitoring.send(
                    NODE_BACKUP_METRIC,
                    "seconds-since-backup",
                    latest.name.as_str(),
                    seconds_ago,
                );
            }
        }
    } else {
        deps.logger.info(
            "report.no_node_backup",
            "this node has not been backed up yet",
            Some(fields(&[("fqdn", deps.fqdn.as_str())])),
        );
    }

    if let Some(complete) = deps.catalog.latest_complete_cluster_backup(ctx).await? {
        freshness.complete_cluster_backup = Some(complete.name.to_string());
        if let Some(finished_ms) = complete.finished_ms() {
            let seconds_ago = seconds_between(finished_ms, now_ms);
            freshness.cluster_seconds_ago = Some(seconds_ago);
            if push_metrics {
                deps.monitoring.send(
                    CLUSTER_BACKUP_METRIC,
                    "seconds-since-backup",
                    complete.name.as_str(),
                    seconds_ago,
                );
            }
        }
    }

    let clusters = deps.catalog.list_cluster_backups(ctx).await?;
    if let Some(latest) = clusters.last() {
        let counts = (
            latest.complete_nodes().len(),
            latest.incomplete_nodes().len(),
            latest.missing_nodes().len(),
        );
        freshness.latest_node_counts = Some(counts);
        if push_metrics {
            push_node_counts(deps.monitoring.as_ref(), latest, counts);
        }
    }

    Ok(freshness)
}

fn push_node_counts(
    monitoring: &dyn MonitoringPort,
    latest: &ClusterBackup,
    (complete, incomplete, missing): (usize, usize, usize),
) {
    let name = latest.name.as_str();
    monitoring.send(
        CLUSTER_BACKUP_METRIC,
        "complete-backups-node-count",
        name,
        complete as i64,
    );
    monitoring.send(
        CLUSTER_BACKUP_METRIC,
        "incomplete-backups-node-count",
        name,
        incomplete as i64,
    );
    monitoring.send(
        CLUSTER_BACKUP_METRIC,
        "missing-backups-node-count",
        name,
        missing as i64,
    );
}

fn seconds_between(earlier_ms: u64, later_ms: u64) -> i64 {
    (later_ms.saturating_sub(earlier_ms) / 1_000) as i64
}

/// The latest complete cluster backup, for the dedicated verb.
pub async fn latest_complete_cluster_backup(
    ctx: &RequestContext,
    catalog: &Catalog,
) -> Result<Option<ClusterBackup>> {
    catalog.latest_complete_cluster_backup(ctx).await
}
