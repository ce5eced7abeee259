//! Per-node restore: download, stop, replace, start.

use crate::catalog::Catalog;
use crate::download::download_backup;
use crate::verify::verify_backup;
use ringvault_domain::{BackupName, NodeFqdn};
use ringvault_ports::{fields, CassandraPort, HealthCheck, LoggerPort};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Dependencies of the node restore engine.
pub struct RestoreNodeDeps {
    /// Backup catalog.
    pub catalog: Catalog,
    /// Node control port.
    pub cassandra: Arc<dyn CassandraPort>,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Health check used while waiting for seeds.
    pub health_check: HealthCheck,
    /// Delay between seed polls (60 s in production).
    pub seed_poll: Duration,
    /// Maximum seed poll attempts (60 in production).
    pub seed_attempts: u32,
}

/// Inputs of one node restore.
#[derive(Debug, Clone)]
pub struct RestoreNodeInput {
    /// Backup to restore.
    pub backup_name: BackupName,
    /// Parent directory for the staging download.
    pub temp_dir: PathBuf,
    /// Restoring onto the node the backup was taken on.
    pub in_place: bool,
    /// Leave `system_auth` untouched.
    pub keep_auth: bool,
    /// Seed hosts that must accept sessions before startup.
    pub seeds: Vec<String>,
    /// Load tables through sstableloader instead of moving files.
    pub use_sstableloader: bool,
    /// Run the verifier against the backup once the restore completes.
    pub verify: bool,
}

/// Restore one node from a backup.
pub async fn restore_node(
    ctx: &RequestContext,
    deps: &RestoreNodeDeps,
    input: RestoreNodeInput,
) -> Result<()> {
    if input.in_place && input.keep_auth {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            "keep-auth only applies to out-of-place restores",
        ));
    }

    let fqdn = NodeFqdn::parse(deps.cassandra.fqdn()).map_err(ErrorEnvelope::from)?;
    let backup = deps.catalog.node_backup(&fqdn, &input.backup_name);
    if !backup.exists(ctx).await? {
        return Err(ErrorEnvelope::expected(
            ErrorCode::not_found(),
            format!("no such backup: {} on {fqdn}", input.backup_name),
        ));
    }

    let download_dir = input
        .temp_dir
        .join(format!("ringvault-restore-{}", Uuid::new_v4()));
    deps.logger.info(
        "restore.downloading",
        "downloading backup data to the staging directory",
        Some(fields(&[
            ("backup", input.backup_name.as_str()),
            ("staging", &download_dir.display().to_string()),
        ])),
    );
    download_backup(ctx, &deps.catalog, &fqdn, &input.backup_name, &download_dir).await?;

    let manifest = backup.manifest(ctx).await?;

    if input.use_sstableloader {
        // Streaming path: the node keeps running and the loader feeds
        // it table by table.
        for section in manifest.sections() {
            if section.keyspace.starts_with("system") {
                continue;
            }
            let table_dir = download_dir.join(&section.keyspace).join(&section.columnfamily);
            deps.cassandra.load_sstables(ctx, table_dir).await?;
        }
        if input.verify {
            post_restore_verify(ctx, deps, &input.backup_name).await?;
        }
        return Ok(());
    }

    deps.logger.info("restore.stopping", "stopping the node", None);
    deps.cassandra.shutdown(ctx).await?;

    // Stale commitlogs and saved caches conflict with the restored
    // system tables.
    remove_dir_if_exists(&deps.cassandra.commit_logs_path())?;
    remove_dir_if_exists(&deps.cassandra.saved_caches_path())?;

    let ownership = deps.cassandra.data_root_ownership();
    for section in manifest.sections() {
        let is_identity_table = section.keyspace == "system"
            && ringvault_domain::IDENTITY_TABLES
                .iter()
                .any(|table| section.columnfamily.starts_with(table));
        let destination = deps
            .cassandra
            .table_path(&section.keyspace, &section.columnfamily);

        if input.keep_auth && section.keyspace == "system_auth" {
            continue;
        }

        if !input.in_place && is_identity_table {
            // The old identity must not leak onto the new node.
            remove_dir_if_exists(&destination)?;
            continue;
        }

        remove_dir_if_exists(&destination)?;
        let staged = download_dir.join(&section.keyspace).join(&section.columnfamily);
        move_dir(&staged, &destination)?;
        if let Some((uid, gid)) = ownership {
            chown_recursive(&destination, uid, gid)?;
        }
    }

    if !input.seeds.is_empty() {
        wait_for_seeds(ctx, deps, &input.seeds).await?;
    }

    deps.logger.info("restore.starting", "starting the node", None);
    if input.in_place {
        deps.cassandra.start_with_implicit_token(ctx).await?;
    } else {
        let tokens = backup.tokens(ctx).await?;
        deps.cassandra.start_with_tokens(ctx, tokens).await?;
    }

    if input.verify {
        post_restore_verify(ctx, deps, &input.backup_name).await?;
    }
    Ok(())
}

async fn post_restore_verify(
    ctx: &RequestContext,
    deps: &RestoreNodeDeps,
    name: &BackupName,
) -> Result<()> {
    deps.logger.info(
        "restore.verifying",
        "verifying the backup after the restore",
        Some(fields(&[("backup", name.as_str())])),
    );
    let report = verify_backup(ctx, &deps.catalog, name).await?;
    if report.is_ok() {
        return Ok(());
    }
    Err(ErrorEnvelope::expected(
        ErrorCode::integrity(),
        format!("backup {name} failed post-restore verification"),
    ))
}

async fn wait_for_seeds(
    ctx: &RequestContext,
    deps: &RestoreNodeDeps,
    seeds: &[String],
) -> Result<()> {
    for _attempt in 0..deps.seed_attempts {
        ctx.ensure_not_cancelled("restore.wait_for_seeds")?;
        for seed in seeds {
            if deps
                .cassandra
                .is_node_up(ctx, seed.clone(), deps.health_check)
                .await?
            {
                return Ok(());
            }
        }
        tokio::select! {
            () = ctx.cancelled() => {
                return Err(ErrorEnvelope::cancelled("operation cancelled"));
            }
            () = tokio::time::sleep(deps.seed_poll) => {}
        }
    }
    Err(ErrorEnvelope::expected(
        ErrorCode::timeout(),
        format!("no seed became reachable: {}", seeds.join(",")),
    ))
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(ErrorEnvelope::from(error)),
    }
}

/// Move a staged directory into place, falling back to a recursive
/// copy when the rename crosses filesystems.
fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorEnvelope::from)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_recursive(src, dst)?;
            remove_dir_if_exists(src)
        },
    }
}

/// Chown a restored directory tree to the data root's owner/group,
/// the way the data tree expects its table directories to be owned.
#[cfg(unix)]
fn chown_recursive(path: &Path, uid: u32, gid: u32) -> Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(ErrorEnvelope::from)?;
    for entry in std::fs::read_dir(path).map_err(ErrorEnvelope::from)? {
        let entry = entry.map_err(ErrorEnvelope::from)?;
        if entry.path().is_dir() {
            chown_recursive(&entry.path(), uid, gid)?;
        } else {
            std::os::unix::fs::chown(entry.path(), Some(uid), Some(gid))
                .map_err(ErrorEnvelope::from)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn chown_recursive(_path: &Path, _uid: u32, _gid: u32) -> Result<()> {
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(ErrorEnvelope::from)?;
    for entry in std::fs::read_dir(src).map_err(ErrorEnvelope::from)? {
        let entry = entry.map_err(ErrorEnvelope::from)?;
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(ErrorEnvelope::from)?;
        }
    }
    Ok(())
}
