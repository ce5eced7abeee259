//! `purge` verb.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_app::{purge, PurgePolicy};
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;
use std::time::{SystemTime, UNIX_EPOCH};

/// Delete obsolete backups per the configured retention.
pub async fn run_purge(
    ctx: &RequestContext,
    app: &AppContext,
    output: OutputFormat,
) -> Result<(), CliError> {
    let policy = PurgePolicy {
        max_backup_age_days: app.config.storage.max_backup_age,
        max_backup_count: app.config.storage.max_backup_count,
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default();

    let report = purge(ctx, &app.catalog, &app.logger, policy, now_ms).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "deletedBackups": report
                .deleted_backups
                .iter()
                .map(|(fqdn, name)| serde_json::json!({"fqdn": fqdn, "name": name}))
                .collect::<Vec<_>>(),
            "deletedObjects": report.deleted_objects,
        });
        println!("{payload:#}");
    } else {
        for (fqdn, name) in &report.deleted_backups {
            println!("Purged {name} of {fqdn}");
        }
        println!("{} object(s) deleted", report.deleted_objects);
    }
    Ok(())
}
