//! `verify` verb.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_app::{verify_backup, Problem};
use ringvault_domain::BackupName;
use ringvault_infra::AppContext;
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext};

fn describe(problem: &Problem) -> (String, &'static str) {
    match problem {
        Problem::Missing { path } => (path.clone(), "Doesn't exist"),
        Problem::WrongFileSize { path, .. } => (path.clone(), "Wrong file size"),
        Problem::WrongChecksum { path } => (path.clone(), "Wrong checksum"),
        Problem::Unexpected { path } => (path.clone(), "Exists in storage, but not in manifest"),
    }
}

/// Verify the integrity of one backup, enumerating every finding.
pub async fn run_verify(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    output: OutputFormat,
) -> Result<(), CliError> {
    let name = BackupName::parse(backup_name).map_err(ErrorEnvelope::from)?;
    let report = verify_backup(ctx, &app.catalog, &name).await?;

    if output.is_json() {
        let problems: Vec<serde_json::Value> = report
            .problems
            .iter()
            .map(|(fqdn, problem)| {
                let (path, kind) = describe(problem);
                serde_json::json!({"fqdn": fqdn, "path": path, "problem": kind})
            })
            .collect();
        let payload = serde_json::json!({
            "name": report.name.as_str(),
            "complete": report.complete,
            "incompleteNodes": report.incomplete_nodes,
            "missingNodes": report.missing_nodes,
            "problems": problems,
        });
        println!("{payload:#}");
    } else {
        println!("Validating {} ...", report.name);
        if report.complete {
            println!("- Completion: OK!");
        } else {
            println!("- Completion: Not complete!");
            for fqdn in &report.incomplete_nodes {
                println!("  - [{fqdn}] Backup started, but not finished yet");
            }
            for fqdn in &report.missing_nodes {
                println!("  - [{fqdn}] Backup missing");
            }
        }
        if report.problems.is_empty() {
            println!("- Manifest validated: OK!");
        } else {
            println!("- Manifest validation: Failed!");
            for (fqdn, problem) in &report.problems {
                let (path, kind) = describe(problem);
                println!("  - [{fqdn}] [{path}] {kind}");
            }
        }
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(ErrorEnvelope::expected(
            ErrorCode::integrity(),
            format!("backup {name} failed verification"),
        )
        .into())
    }
}
