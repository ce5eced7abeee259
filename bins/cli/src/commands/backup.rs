//! `backup` verb.

use crate::error::CliError;
use crate::format::{format_timestamp, OutputFormat};
use ringvault_app::{backup_node, format_bytes, BackupNodeDeps, BackupNodeInput};
use ringvault_domain::{BackupMode, BackupName};
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;
use std::time::Duration;

const STAGGER_POLL: Duration = Duration::from_secs(60);

/// Run a node backup.
pub async fn run_backup(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: Option<&str>,
    stagger_seconds: Option<u64>,
    mode: BackupMode,
    output: OutputFormat,
) -> Result<(), CliError> {
    let backup_name = match backup_name {
        Some(raw) => Some(BackupName::parse(raw).map_err(ringvault_shared::ErrorEnvelope::from)?),
        None => None,
    };

    let deps = BackupNodeDeps {
        catalog: app.catalog.clone(),
        cassandra: app.cassandra()?,
        logger: app.logger.clone(),
        monitoring: Some(app.monitoring.clone()),
        stagger_poll: STAGGER_POLL,
    };
    let input = BackupNodeInput {
        backup_name,
        stagger: stagger_seconds.map(Duration::from_secs),
        mode,
    };

    let report = backup_node(ctx, &deps, input).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "name": report.name.as_str(),
            "startedMs": report.started_ms,
            "finishedMs": report.finished_ms,
            "sections": report.sections,
            "objects": report.objects,
            "totalSize": report.total_size,
            "replaced": report.replaced,
            "uploaded": report.uploaded,
        });
        println!("{payload:#}");
    } else {
        println!(
            "{} (started: {}, finished: {})",
            report.name,
            format_timestamp(report.started_ms),
            format_timestamp(report.finished_ms)
        );
        println!(
            "- {} objects, {} ({} uploaded, {} reused)",
            report.objects,
            format_bytes(report.total_size),
            report.uploaded,
            report.replaced
        );
    }
    Ok(())
}
