//! `build-index` verb.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;

/// Rebuild the backup index from the authoritative meta objects.
pub async fn run_build_index(
    ctx: &RequestContext,
    app: &AppContext,
    noop: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let report = app.catalog.build_index(ctx, noop).await?;

    if output.is_json() {
        let payload = serde_json::json!({
            "noop": noop,
            "indexed": report
                .indexed
                .iter()
                .map(|(fqdn, name)| serde_json::json!({"fqdn": fqdn, "name": name}))
                .collect::<Vec<_>>(),
            "latest": report
                .latest
                .iter()
                .map(|(fqdn, name)| serde_json::json!({"fqdn": fqdn, "name": name}))
                .collect::<Vec<_>>(),
        });
        println!("{payload:#}");
        return Ok(());
    }

    if noop {
        println!("--noop was set, computed the index without uploading");
    }
    for (fqdn, name) in &report.indexed {
        println!("Indexed {name} from {fqdn}");
    }
    for (fqdn, name) in &report.latest {
        println!("Latest backup of {fqdn} is {name}");
    }
    Ok(())
}
