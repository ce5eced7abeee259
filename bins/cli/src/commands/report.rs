//! `report-last-backup`, `get-last-complete-cluster-backup`, and
//! `fetch-tokenmap` verbs.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_app::{fetch_tokenmap, latest_complete_cluster_backup, report_last_backup, ReportDeps};
use ringvault_domain::BackupName;
use ringvault_infra::AppContext;
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const REPORT_ATTEMPTS: u32 = 3;
const REPORT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Print time since the last backups, optionally pushing metrics.
pub async fn run_report_last_backup(
    ctx: &RequestContext,
    app: &AppContext,
    push_metrics: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let deps = ReportDeps {
        catalog: app.catalog.clone(),
        fqdn: app.fqdn.clone(),
        logger: app.logger.clone(),
        monitoring: app.monitoring.clone(),
        attempts: REPORT_ATTEMPTS,
        retry_delay: REPORT_RETRY_DELAY,
    };
    let now_ms = now_epoch_ms();
    let freshness = report_last_backup(ctx, &deps, push_metrics, now_ms).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "nodeSecondsAgo": freshness.node_seconds_ago,
            "nodeBackupName": freshness.node_backup_name,
            "completeClusterBackup": freshness.complete_cluster_backup,
            "clusterSecondsAgo": freshness.cluster_seconds_ago,
        });
        println!("{payload:#}");
        return Ok(());
    }

    match (&freshness.node_backup_name, freshness.node_seconds_ago) {
        (Some(name), Some(seconds)) => {
            println!("Latest node backup {name} finished {seconds} seconds ago");
        },
        _ => println!("This node has not been backed up yet"),
    }
    match (&freshness.complete_cluster_backup, freshness.cluster_seconds_ago) {
        (Some(name), Some(seconds)) => {
            println!("Latest complete cluster backup {name} finished {seconds} seconds ago");
        },
        _ => println!("The cluster has no complete backup yet"),
    }
    if let Some((complete, incomplete, missing)) = freshness.latest_node_counts {
        println!(
            "Latest cluster backup nodes: {complete} complete, {incomplete} incomplete, {missing} missing"
        );
    }
    Ok(())
}

/// Print the name of the latest complete cluster backup.
pub async fn run_get_last_complete(
    ctx: &RequestContext,
    app: &AppContext,
    output: OutputFormat,
) -> Result<(), CliError> {
    let backup = latest_complete_cluster_backup(ctx, &app.catalog)
        .await?
        .ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::not_found(),
                "the cluster has no complete backup yet",
            )
        })?;

    if output.is_json() {
        println!("{:#}", serde_json::json!({"name": backup.name.as_str()}));
    } else {
        println!("{}", backup.name);
    }
    Ok(())
}

/// Print the tokenmap a backup was taken with.
pub async fn run_fetch_tokenmap(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    output: OutputFormat,
) -> Result<(), CliError> {
    let name = BackupName::parse(backup_name).map_err(ErrorEnvelope::from)?;
    let tokenmap = fetch_tokenmap(ctx, &app.catalog, &name).await?;

    if output.is_json() {
        println!("{}", tokenmap.to_json()?);
        return Ok(());
    }
    for (fqdn, entry) in tokenmap.iter() {
        println!(
            "{fqdn} [{}] tokens: {}",
            if entry.is_up { "up" } else { "down" },
            entry.tokens.join(",")
        );
    }
    Ok(())
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}
