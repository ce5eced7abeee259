//! Cluster-wide restore orchestration.
//!
//! Stages: map backup hosts onto live targets, stop every target,
//! restore seeds, then restore the rest with the seeds as their
//! startup gate. Remote commands run under the supervisor wrapper so a
//! transport drop does not kill the restore; a single 5 s poll loop
//! watches every host.

use crate::catalog::Catalog;
use crate::verify::verify_backup;
use ringvault_domain::{BackupName, TokenMap};
use ringvault_ports::{
    fields, CassandraPort, LoggerPort, PromptPort, RemoteExecPort, RemoteHandle, RemoteStatus,
};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One backup-host to live-host assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMapping {
    /// Host the backup was taken on.
    pub source: String,
    /// Host to restore onto.
    pub target: String,
    /// Seed targets restore before everything else.
    pub seed: bool,
}

/// Where the restore targets come from.
#[derive(Debug, Clone)]
pub enum RestoreTargets {
    /// In-place: derive targets from the live tokenmap of this host.
    SeedTarget(String),
    /// Out-of-place: explicit host-list file content.
    HostList(String),
}

/// Dependencies of the cluster orchestrator.
pub struct RestoreClusterDeps {
    /// Backup catalog.
    pub catalog: Catalog,
    /// Node control port (live tokenmap acquisition).
    pub cassandra: Arc<dyn CassandraPort>,
    /// Remote executor.
    pub remote: Arc<dyn RemoteExecPort>,
    /// Operator confirmation.
    pub prompt: Arc<dyn PromptPort>,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Command that stops a node, run on every target.
    pub stop_command: String,
    /// Poll interval of the wait loop (5 s in production).
    pub poll_interval: Duration,
}

/// Inputs of one cluster restore.
#[derive(Debug, Clone)]
pub struct RestoreClusterInput {
    /// Backup to restore.
    pub backup_name: BackupName,
    /// Target selection (exactly one mode).
    pub targets: RestoreTargets,
    /// Remote temp directory for staging downloads.
    pub temp_dir: PathBuf,
    /// Keep `system_auth` on the targets.
    pub keep_auth: bool,
    /// Load through sstableloader on the targets.
    pub use_sstableloader: bool,
    /// Skip the interactive confirmation.
    pub bypass_checks: bool,
    /// Verify the backup once every host has restored.
    pub verify: bool,
    /// Host-list field separator.
    pub host_file_separator: String,
}

/// Per-host outcome of a cluster restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreClusterReport {
    /// Hosts that finished successfully.
    pub finished: Vec<String>,
    /// Hosts that broke: `(host, exit code, captured stderr)`.
    pub broken: Vec<(String, i32, String)>,
}

impl RestoreClusterReport {
    /// Returns true when no host broke.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.broken.is_empty()
    }
}

/// Orchestrate a cluster-wide restore.
pub async fn restore_cluster(
    ctx: &RequestContext,
    deps: &RestoreClusterDeps,
    input: RestoreClusterInput,
) -> Result<RestoreClusterReport> {
    let cluster = deps
        .catalog
        .get_cluster_backup(ctx, &input.backup_name)
        .await?;
    if !cluster.is_complete() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("backup {} is incomplete", input.backup_name),
        ));
    }

    let mappings = match &input.targets {
        RestoreTargets::SeedTarget(seed_target) => {
            let live = deps
                .cassandra
                .tokenmap_of(ctx, seed_target.clone())
                .await?;
            map_in_place(&cluster.tokenmap, &live)?
        },
        RestoreTargets::HostList(content) => {
            parse_host_list(content, &input.host_file_separator)?
        },
    };
    ensure_full_coverage(&cluster.tokenmap, &mappings)?;

    if !input.bypass_checks {
        let message = format!(
            "About to restore backup {} onto {} host(s), stopping Cassandra on all of them. Continue?",
            input.backup_name,
            mappings.len()
        );
        if !deps.prompt.confirm(&message)? {
            return Err(ErrorEnvelope::cancelled("restore aborted by the operator"));
        }
    }

    stop_all(ctx, deps, &mappings).await?;

    let job_id = Uuid::new_v4();
    let seeds: Vec<&HostMapping> = mappings.iter().filter(|mapping| mapping.seed).collect();
    let others: Vec<&HostMapping> = mappings.iter().filter(|mapping| !mapping.seed).collect();
    let seed_hosts: Vec<String> = seeds.iter().map(|mapping| mapping.target.clone()).collect();

    let mut report = RestoreClusterReport::default();

    if !seeds.is_empty() {
        deps.logger.info(
            "restore_cluster.seeds",
            "restoring seed targets",
            Some(fields(&[("count", &seeds.len().to_string())])),
        );
        let stage = run_stage(ctx, deps, &input, &seeds, &[], job_id).await?;
        merge(&mut report, stage);
        if !report.is_success() {
            return finish(deps, report);
        }
    }

    if !others.is_empty() {
        deps.logger.info(
            "restore_cluster.others",
            "restoring remaining targets",
            Some(fields(&[("count", &others.len().to_string())])),
        );
        let stage = run_stage(ctx, deps, &input, &others, &seed_hosts, job_id).await?;
        merge(&mut report, stage);
    }

    let report = finish(deps, report)?;
    if input.verify && report.is_success() {
        deps.logger.info(
            "restore_cluster.verifying",
            "verifying the backup after the cluster restore",
            Some(fields(&[("backup", input.backup_name.as_str())])),
        );
        let verification = verify_backup(ctx, &deps.catalog, &input.backup_name).await?;
        if !verification.is_ok() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::integrity(),
                format!(
                    "backup {} failed post-restore verification",
                    input.backup_name
                ),
            ));
        }
    }
    Ok(report)
}

fn finish(
    deps: &RestoreClusterDeps,
    report: RestoreClusterReport,
) -> Result<RestoreClusterReport> {
    for (host, exit_code, stderr) in &report.broken {
        deps.logger.error(
            "restore_cluster.broken",
            &format!("restore on {host} exited {exit_code}"),
            Some(fields(&[("host", host), ("stderr", stderr)])),
        );
    }
    Ok(report)
}

fn merge(report: &mut RestoreClusterReport, stage: RestoreClusterReport) {
    report.finished.extend(stage.finished);
    report.broken.extend(stage.broken);
}

async fn stop_all(
    ctx: &RequestContext,
    deps: &RestoreClusterDeps,
    mappings: &[HostMapping],
) -> Result<()> {
    deps.logger.info(
        "restore_cluster.stop_all",
        "stopping Cassandra on every target",
        Some(fields(&[("count", &mappings.len().to_string())])),
    );
    for mapping in mappings {
        let exit = deps
            .remote
            .run(ctx, mapping.target.clone(), deps.stop_command.clone())
            .await?;
        if exit != 0 {
            return Err(ErrorEnvelope::unexpected(
                ErrorCode::remote_exec(),
                format!("stopping Cassandra on {} exited {exit}", mapping.target),
                ringvault_shared::ErrorClass::NonRetriable,
            ));
        }
    }
    Ok(())
}

async fn run_stage(
    ctx: &RequestContext,
    deps: &RestoreClusterDeps,
    input: &RestoreClusterInput,
    stage: &[&HostMapping],
    seed_hosts: &[String],
    job_id: Uuid,
) -> Result<RestoreClusterReport> {
    let mut handles: Vec<Box<dyn RemoteHandle>> = Vec::with_capacity(stage.len());
    for mapping in stage {
        let job_dir = format!(
            "{}/ringvault-job-{job_id}",
            input.temp_dir.display()
        );
        let command = restore_command(input, mapping, seed_hosts);
        let handle = deps
            .remote
            .start_supervised(ctx, mapping.target.clone(), job_dir, command)
            .await?;
        handles.push(handle);
    }
    wait_for_remotes(ctx, deps, handles).await
}

/// The restore-node invocation executed on one target.
fn restore_command(
    input: &RestoreClusterInput,
    mapping: &HostMapping,
    seed_hosts: &[String],
) -> String {
    let mut command = format!(
        "ringvault --fqdn {} restore-node --backup-name {} --temp-dir {}",
        mapping.source,
        input.backup_name,
        input.temp_dir.display()
    );
    let in_place = mapping.source == mapping.target;
    if in_place {
        command.push_str(" --in-place");
    }
    if input.keep_auth && !in_place {
        command.push_str(" --keep-auth");
    }
    if input.use_sstableloader {
        command.push_str(" --use-sstableloader");
    }
    if !seed_hosts.is_empty() {
        command.push_str(" --seeds ");
        command.push_str(&seed_hosts.join(","));
    }
    command
}

async fn wait_for_remotes(
    ctx: &RequestContext,
    deps: &RestoreClusterDeps,
    handles: Vec<Box<dyn RemoteHandle>>,
) -> Result<RestoreClusterReport> {
    let mut report = RestoreClusterReport::default();
    let mut pending = handles;

    while !pending.is_empty() {
        ctx.ensure_not_cancelled("restore_cluster.wait")?;

        let mut still_running = Vec::with_capacity(pending.len());
        for handle in pending {
            match handle.poll(ctx).await? {
                RemoteStatus::Running => still_running.push(handle),
                RemoteStatus::Finished => {
                    deps.logger.info(
                        "restore_cluster.finished",
                        &format!("restore on {} finished", handle.host()),
                        None,
                    );
                    report.finished.push(handle.host().to_owned());
                },
                RemoteStatus::Broken { exit_code } => {
                    let stderr = handle.fetch_stderr(ctx).await.unwrap_or_default();
                    report
                        .broken
                        .push((handle.host().to_owned(), exit_code, stderr));
                },
            }
        }
        pending = still_running;

        if pending.is_empty() {
            break;
        }
        tokio::select! {
            () = ctx.cancelled() => {
                return Err(ErrorEnvelope::cancelled("operation cancelled"));
            }
            () = tokio::time::sleep(deps.poll_interval) => {}
        }
    }

    Ok(report)
}

/// In-place mapping: match the backup ring onto the live ring token
/// set by token set.
pub fn map_in_place(backup: &TokenMap, live: &TokenMap) -> Result<Vec<HostMapping>> {
    if backup.is_empty() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::topology_mismatch(),
            "the backup tokenmap is empty",
        ));
    }
    for (host, entry) in live.iter() {
        if !entry.is_up {
            return Err(ErrorEnvelope::expected(
                ErrorCode::topology_mismatch(),
                format!("target {host} is not up"),
            ));
        }
    }
    if live.len() != backup.len() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::topology_mismatch(),
            format!(
                "cannot restore to a tokenmap of differing size ({} vs {})",
                live.len(),
                backup.len()
            ),
        ));
    }

    let backup_by_tokens: BTreeMap<String, String> = backup
        .iter()
        .map(|(host, entry)| (TokenMap::token_order_key(entry), host.to_owned()))
        .collect();
    let live_by_tokens: BTreeMap<String, String> = live
        .iter()
        .map(|(host, entry)| (TokenMap::token_order_key(entry), host.to_owned()))
        .collect();

    if backup_by_tokens.keys().ne(live_by_tokens.keys()) {
        let difference: Vec<String> = backup_by_tokens
            .keys()
            .filter(|key| !live_by_tokens.contains_key(*key))
            .chain(
                live_by_tokens
                    .keys()
                    .filter(|key| !backup_by_tokens.contains_key(*key)),
            )
            .cloned()
            .collect();
        return Err(ErrorEnvelope::expected(
            ErrorCode::topology_mismatch(),
            format!(
                "the token rings are differently distributed: {}",
                difference.join(" ")
            ),
        ));
    }

    Ok(backup_by_tokens
        .into_iter()
        .map(|(tokens, source)| {
            let target = live_by_tokens.get(&tokens).cloned().unwrap_or_default();
            HostMapping {
                source,
                target,
                seed: false,
            }
        })
        .collect())
}

/// Parse a host-list file: one record per line,
/// `<tokens><sep><seed><sep><target><sep><source>`.
pub fn parse_host_list(content: &str, separator: &str) -> Result<Vec<HostMapping>> {
    let mut mappings = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // Tokens may themselves contain the separator, so the record
        // is split from the right.
        let mut parts = trimmed.rsplitn(4, separator);
        let source = parts.next().map(str::trim);
        let target = parts.next().map(str::trim);
        let seed = parts.next().map(str::trim);
        let tokens = parts.next();
        let (Some(source), Some(target), Some(seed), Some(_tokens)) =
            (source, target, seed, tokens)
        else {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                format!("host list line {} is malformed", line_number + 1),
            ));
        };
        if source.is_empty() || target.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                format!("host list line {} is missing a host", line_number + 1),
            ));
        }
        mappings.push(HostMapping {
            source: source.to_owned(),
            target: target.to_owned(),
            seed: seed == "True",
        });
    }
    if mappings.is_empty() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            "the host list contains no records",
        ));
    }
    Ok(mappings)
}

/// Every backup host must map onto exactly one target.
fn ensure_full_coverage(backup: &TokenMap, mappings: &[HostMapping]) -> Result<()> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for mapping in mappings {
        *seen.entry(mapping.source.as_str()).or_default() += 1;
    }
    for host in backup.hosts() {
        match seen.get(host.as_str()) {
            Some(1) => {},
            Some(_) => {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::topology_mismatch(),
                    format!("backup host {host} is mapped more than once"),
                ));
            },
            None => {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::topology_mismatch(),
                    format!("backup host {host} has no restore target"),
                ));
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringvault_domain::RingEntry;

    fn ring(entries: &[(&str, &[&str], bool)]) -> TokenMap {
        let mut map = TokenMap::new();
        for (host, tokens, is_up) in entries {
            map.insert(
                (*host).to_owned(),
                RingEntry {
                    tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
                    is_up: *is_up,
                },
            );
        }
        map
    }

    #[test]
    fn host_list_maps_source_to_target() {
        let content = "tokens,False,n3,n4\n100,True,n1,n1\n";
        let mappings = parse_host_list(content, ",").expect("parse host list");
        assert_eq!(mappings.len(), 2);
        let n4 = mappings
            .iter()
            .find(|mapping| mapping.source == "n4")
            .expect("n4 mapping");
        assert_eq!(n4.target, "n3");
        assert!(!n4.seed);
        let n1 = mappings
            .iter()
            .find(|mapping| mapping.source == "n1")
            .expect("n1 mapping");
        assert!(n1.seed);
    }

    #[test]
    fn host_list_tokens_may_contain_the_separator() {
        let content = "-100,200,300,False,target9,source9\n";
        let mappings = parse_host_list(content, ",").expect("parse host list");
        assert_eq!(mappings[0].source, "source9");
        assert_eq!(mappings[0].target, "target9");
    }

    #[test]
    fn empty_host_list_is_rejected() {
        assert!(parse_host_list("\n# comment only\n", ",").is_err());
    }

    #[test]
    fn in_place_mapping_pairs_equal_token_sets() {
        let backup = ring(&[("old1", &["100"], true), ("old2", &["200"], true)]);
        let live = ring(&[("new2", &["200"], true), ("new1", &["100"], true)]);
        let mappings = map_in_place(&backup, &live).expect("mapping");
        assert_eq!(mappings.len(), 2);
        let by_source: BTreeMap<&str, &str> = mappings
            .iter()
            .map(|mapping| (mapping.source.as_str(), mapping.target.as_str()))
            .collect();
        assert_eq!(by_source.get("old1"), Some(&"new1"));
        assert_eq!(by_source.get("old2"), Some(&"new2"));
    }

    #[test]
    fn down_target_fails_the_mapping() {
        let backup = ring(&[("old1", &["100"], true)]);
        let live = ring(&[("new1", &["100"], false)]);
        let error = map_in_place(&backup, &live).expect_err("down target");
        assert_eq!(error.code, ErrorCode::topology_mismatch());
    }

    #[test]
    fn size_mismatch_fails_the_mapping() {
        let backup = ring(&[("old1", &["100"], true), ("old2", &["200"], true)]);
        let live = ring(&[("new1", &["100"], true)]);
        assert!(map_in_place(&backup, &live).is_err());
    }

    #[test]
    fn token_difference_names_the_symmetric_difference() {
        let backup = ring(&[("old1", &["100"], true)]);
        let live = ring(&[("new1", &["999"], true)]);
        let error = map_in_place(&backup, &live).expect_err("different tokens");
        assert!(error.message.contains("100"));
        assert!(error.message.contains("999"));
    }

    #[test]
    fn empty_backup_tokenmap_is_rejected() {
        let backup = TokenMap::new();
        let live = ring(&[("new1", &["100"], true)]);
        let error = map_in_place(&backup, &live).expect_err("empty tokenmap");
        assert_eq!(error.code, ErrorCode::topology_mismatch());
    }

    #[test]
    fn restore_commands_carry_the_stage_flags() {
        let input = RestoreClusterInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            targets: RestoreTargets::HostList(String::new()),
            temp_dir: PathBuf::from("/tmp"),
            keep_auth: true,
            use_sstableloader: false,
            bypass_checks: true,
            verify: false,
            host_file_separator: ",".to_owned(),
        };
        let mapping = HostMapping {
            source: "n4".to_owned(),
            target: "n3".to_owned(),
            seed: false,
        };
        let command = restore_command(&input, &mapping, &["s1".to_owned(), "s2".to_owned()]);
        assert_eq!(
            command,
            "ringvault --fqdn n4 restore-node --backup-name bk1 --temp-dir /tmp --keep-auth --seeds s1,s2"
        );

        let in_place = HostMapping {
            source: "n1".to_owned(),
            target: "n1".to_owned(),
            seed: true,
        };
        let command = restore_command(&input, &in_place, &[]);
        assert!(command.contains("--in-place"));
        assert!(!command.contains("--seeds"));
    }
}
