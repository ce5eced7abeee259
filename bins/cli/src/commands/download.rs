//! `download` verb.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_app::download_backup;
use ringvault_domain::BackupName;
use ringvault_infra::AppContext;
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::path::Path;

/// Download a node backup into a local directory.
pub async fn run_download(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    destination: &Path,
    output: OutputFormat,
) -> Result<(), CliError> {
    if !destination.is_dir() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("{} is not a directory", destination.display()),
        )
        .into());
    }
    let name = BackupName::parse(backup_name).map_err(ErrorEnvelope::from)?;
    download_backup(ctx, &app.catalog, &app.fqdn, &name, destination).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "name": name.as_str(),
            "destination": destination.display().to_string(),
        });
        println!("{payload:#}");
    } else {
        println!("Downloaded {name} to {}", destination.display());
    }
    Ok(())
}
