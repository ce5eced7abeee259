//! `list-backups` verb.

use crate::error::CliError;
use crate::format::{format_timestamp_opt, OutputFormat};
use ringvault_app::list_backups;
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;

/// List cluster backups.
pub async fn run_list_backups(
    ctx: &RequestContext,
    app: &AppContext,
    show_all: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let entries = list_backups(ctx, &app.catalog, &app.fqdn, show_all).await?;

    if output.is_json() {
        let payload: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.name,
                    "startedMs": entry.started_ms,
                    "finishedMs": entry.finished_ms,
                    "nodes": entry.nodes,
                    "ringSize": entry.ring_size,
                })
            })
            .collect();
        println!("{:#}", serde_json::Value::Array(payload));
        return Ok(());
    }

    for entry in entries {
        let finished = match entry.finished_ms {
            Some(finished_ms) => format_timestamp_opt(Some(finished_ms), "never"),
            None => format!("Incomplete [{} of {} nodes]", entry.nodes, entry.ring_size),
        };
        println!(
            "{} (started: {}, finished: {finished})",
            entry.name,
            format_timestamp_opt(entry.started_ms, "unknown")
        );
    }
    Ok(())
}
