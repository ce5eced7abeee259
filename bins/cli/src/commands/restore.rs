//! `restore-node` and `restore-cluster` verbs.

use crate::error::CliError;
use crate::format::OutputFormat;
use ringvault_app::{
    restore_cluster, restore_node, RestoreClusterDeps, RestoreClusterInput, RestoreNodeDeps,
    RestoreNodeInput, RestoreTargets,
};
use ringvault_domain::BackupName;
use ringvault_infra::AppContext;
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SEED_POLL: Duration = Duration::from_secs(60);
const SEED_ATTEMPTS: u32 = 60;
const RESTORE_POLL: Duration = Duration::from_secs(5);

/// Restore this node from a backup.
#[allow(clippy::too_many_arguments)]
pub async fn run_restore_node(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    temp_dir: &Path,
    in_place: bool,
    keep_auth: bool,
    seeds: Option<&str>,
    use_sstableloader: bool,
    verify: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let name = BackupName::parse(backup_name).map_err(ErrorEnvelope::from)?;
    let deps = RestoreNodeDeps {
        catalog: app.catalog.clone(),
        cassandra: app.cassandra()?,
        logger: app.logger.clone(),
        health_check: app.health_check,
        seed_poll: SEED_POLL,
        seed_attempts: SEED_ATTEMPTS,
    };
    let input = RestoreNodeInput {
        backup_name: name.clone(),
        temp_dir: temp_dir.to_path_buf(),
        in_place,
        keep_auth,
        seeds: seeds
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|seed| !seed.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        use_sstableloader,
        verify,
    };

    restore_node(ctx, &deps, input).await?;

    if output.is_json() {
        println!("{:#}", serde_json::json!({"restored": name.as_str()}));
    } else {
        println!("Restored {name}");
    }
    Ok(())
}

/// Restore a whole cluster from a backup.
#[allow(clippy::too_many_arguments)]
pub async fn run_restore_cluster(
    ctx: &RequestContext,
    app: &AppContext,
    backup_name: &str,
    seed_target: Option<&str>,
    host_list: Option<&Path>,
    temp_dir: &Path,
    keep_auth: bool,
    bypass_checks: bool,
    use_sstableloader: bool,
    verify: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let name = BackupName::parse(backup_name).map_err(ErrorEnvelope::from)?;
    let targets = match (seed_target, host_list) {
        (Some(seed_target), None) => RestoreTargets::SeedTarget(seed_target.to_owned()),
        (None, Some(host_list)) => {
            let content = std::fs::read_to_string(host_list).map_err(|error| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("cannot read host list {}: {error}", host_list.display()),
                )
            })?;
            RestoreTargets::HostList(content)
        },
        _ => {
            return Err(CliError::Usage(
                "exactly one of --seed-target and --host-list is required".to_owned(),
            ));
        },
    };

    let deps = RestoreClusterDeps {
        catalog: app.catalog.clone(),
        cassandra: app.cassandra()?,
        remote: app.remote(),
        prompt: app.prompt(bypass_checks),
        logger: app.logger.clone(),
        stop_command: app.config.cassandra.stop_cmd.clone(),
        poll_interval: RESTORE_POLL,
    };
    let input = RestoreClusterInput {
        backup_name: name.clone(),
        targets,
        temp_dir: PathBuf::from(temp_dir),
        keep_auth,
        use_sstableloader,
        bypass_checks,
        verify,
        host_file_separator: app.config.storage.host_file_separator.clone(),
    };

    let report = restore_cluster(ctx, &deps, input).await?;

    if output.is_json() {
        let broken: Vec<serde_json::Value> = report
            .broken
            .iter()
            .map(|(host, exit_code, stderr)| {
                serde_json::json!({"host": host, "exitCode": exit_code, "stderr": stderr})
            })
            .collect();
        let payload = serde_json::json!({
            "name": name.as_str(),
            "finished": report.finished,
            "broken": broken,
        });
        println!("{payload:#}");
    } else {
        for host in &report.finished {
            println!("Finished: {host}");
        }
        for (host, exit_code, stderr) in &report.broken {
            println!("Broken: {host} (exit {exit_code})");
            if !stderr.is_empty() {
                println!("  {stderr}");
            }
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(ErrorEnvelope::unexpected(
            ErrorCode::remote_exec(),
            format!("{} host(s) failed to restore", report.broken.len()),
            ringvault_shared::ErrorClass::NonRetriable,
        )
        .into())
    }
}
