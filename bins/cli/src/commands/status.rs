//! `status` verb.

use crate::error::CliError;
use crate::format::{format_timestamp_opt, OutputFormat};
use ringvault_app::{backup_status, format_bytes};
use ringvault_domain::BackupName;
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;

/// Show the status of one backup.
pub async fn run_status(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    output: OutputFormat,
) -> Result<(), CliError> {
    let name = BackupName::parse(backup_name).map_err(ringvault_shared::ErrorEnvelope::from)?;
    let report = backup_status(ctx, &app.catalog, &name).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "name": report.name.as_str(),
            "complete": report.complete,
            "startedMs": report.started_ms,
            "finishedMs": report.finished_ms,
            "completeNodes": report.complete_nodes,
            "incompleteNodes": report.incomplete_nodes,
            "missingNodes": report.missing_nodes,
            "objects": report.objects,
            "totalSize": report.total_size,
        });
        println!("{payload:#}");
        return Ok(());
    }

    if report.complete {
        println!("{}", report.name);
    } else {
        println!("{} [Incomplete!]", report.name);
    }
    println!(
        "- Started: {}, Finished: {}",
        format_timestamp_opt(report.started_ms, "unknown"),
        format_timestamp_opt(report.finished_ms, "never")
    );
    println!(
        "- {} nodes completed, {} nodes incomplete, {} nodes missing",
        report.complete_nodes, report.incomplete_nodes, report.missing_nodes
    );
    println!(
        "- {} files, {}",
        report.objects,
        format_bytes(report.total_size)
    );
    Ok(())
}
