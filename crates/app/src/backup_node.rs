//! Per-node backup pipeline.
//!
//! Protocol: optional stagger wait, duplicate-name check, scoped
//! snapshot, `schema → tokenmap → data → manifest` writes with index
//! entries at start and finish. A failure after the start entries
//! leaves a partial backup that is observably incomplete (no manifest
//! object); the snapshot is released on every exit path.

use crate::backup_cache::{NodeBackupCache, Retained};
use crate::catalog::Catalog;
use ringvault_domain::{BackupMode, BackupName, Manifest, ManifestObject, ManifestSection, NodeFqdn, TokenMap};
use ringvault_ports::{fields, CassandraPort, LoggerPort, MonitoringPort, StoragePort, StoredObject};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Dependencies of the backup engine.
pub struct BackupNodeDeps {
    /// Backup catalog (storage + layout).
    pub catalog: Catalog,
    /// Node control port.
    pub cassandra: Arc<dyn CassandraPort>,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Optional metric emitter (error metric on failure).
    pub monitoring: Option<Arc<dyn MonitoringPort>>,
    /// Stagger poll interval (60 s in production).
    pub stagger_poll: Duration,
}

/// Inputs of one backup run.
#[derive(Debug, Clone)]
pub struct BackupNodeInput {
    /// Backup name; generated from the wall clock when absent.
    pub backup_name: Option<BackupName>,
    /// Stagger window; `None` disables staggering.
    pub stagger: Option<Duration>,
    /// Full or incremental mode.
    pub mode: BackupMode,
}

/// Summary of a finished backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNodeReport {
    /// The backup's name.
    pub name: BackupName,
    /// Start time (schema object creation).
    pub started_ms: u64,
    /// Finish time (manifest object creation).
    pub finished_ms: u64,
    /// Number of manifest sections.
    pub sections: usize,
    /// Number of objects referenced by the manifest.
    pub objects: usize,
    /// Total referenced bytes.
    pub total_size: u64,
    /// Files substituted from the previous backup.
    pub replaced: u32,
    /// Files actually uploaded.
    pub uploaded: usize,
}

/// Run one node backup.
pub async fn backup_node(
    ctx: &RequestContext,
    deps: &BackupNodeDeps,
    input: BackupNodeInput,
) -> Result<BackupNodeReport> {
    let name = match input.backup_name.clone() {
        Some(name) => name,
        None => BackupName::parse(&now_epoch_ms().div_euclid(1_000).to_string())
            .map_err(ErrorEnvelope::from)?,
    };
    match run(ctx, deps, &name, &input).await {
        Ok(report) => Ok(report),
        Err(error) => {
            if let Some(monitoring) = deps.monitoring.as_ref() {
                monitoring.send("ringvault-backup", "backup-error", name.as_str(), 1);
            }
            deps.logger.error(
                "backup.failed",
                &format!("backup {name} failed: {error}"),
                Some(fields(&[("backup", name.as_str())])),
            );
            Err(error)
        },
    }
}

async fn run(
    ctx: &RequestContext,
    deps: &BackupNodeDeps,
    name: &BackupName,
    input: &BackupNodeInput,
) -> Result<BackupNodeReport> {
    let fqdn = NodeFqdn::parse(deps.cassandra.fqdn()).map_err(ErrorEnvelope::from)?;

    if let Some(window) = input.stagger {
        deps.logger.info(
            "backup.staggering",
            "waiting for the ring predecessor to finish a backup",
            Some(fields(&[("backup", name.as_str()), ("fqdn", fqdn.as_str())])),
        );
        let tokenmap = deps.cassandra.tokenmap(ctx).await?;
        wait_for_stagger(ctx, deps, &fqdn, &tokenmap, window).await?;
    }

    let backup = deps.catalog.node_backup(&fqdn, name);
    if backup.exists(ctx).await? {
        return Err(ErrorEnvelope::expected(
            ErrorCode::already_exists(),
            format!("backup {name} already exists for {fqdn}"),
        ));
    }

    let tag = format!("ringvault-{}", Uuid::new_v4());
    deps.logger.info(
        "backup.snapshotting",
        "taking a node snapshot",
        Some(fields(&[("backup", name.as_str()), ("tag", &tag)])),
    );
    deps.cassandra.create_snapshot(ctx, tag.clone()).await?;

    let outcome = pipeline(ctx, deps, &fqdn, name, input.mode, &tag).await;

    // The snapshot is released no matter how the pipeline ended; a
    // release failure must not mask the pipeline error.
    if let Err(release_error) = deps.cassandra.delete_snapshot(ctx, tag.clone()).await {
        deps.logger.warn(
            "backup.snapshot_release_failed",
            &format!("snapshot {tag} could not be released: {release_error}"),
            Some(fields(&[("tag", &tag)])),
        );
    }

    outcome
}

async fn pipeline(
    ctx: &RequestContext,
    deps: &BackupNodeDeps,
    fqdn: &NodeFqdn,
    name: &BackupName,
    mode: BackupMode,
    tag: &str,
) -> Result<BackupNodeReport> {
    let storage = Arc::clone(deps.catalog.storage());
    let layout = deps.catalog.layout().clone();

    let schema = deps.cassandra.dump_schema(ctx).await?;
    let tokenmap = deps.cassandra.tokenmap(ctx).await?;
    let tokenmap_json = tokenmap.to_json()?;

    let schema_object = storage
        .upload_from_string(ctx, layout.schema_path(fqdn, name), schema.clone())
        .await?;
    let started_ms = schema_object.time_ms().unwrap_or_else(now_epoch_ms);
    storage
        .upload_from_string(ctx, layout.tokenmap_path(fqdn, name), tokenmap_json.clone())
        .await?;
    deps.catalog
        .record_backup_start(ctx, fqdn, name, &tokenmap_json, &schema, started_ms)
        .await?;

    let previous = match deps.catalog.latest_node_backup(ctx, fqdn).await? {
        Some(record) => Some(deps.catalog.node_backup(fqdn, &record.name)),
        None => None,
    };
    let mut cache = NodeBackupCache::seed(
        ctx,
        previous.as_ref(),
        mode,
        storage.reports_content_hashes_on_put(),
    )
    .await?;

    deps.logger.info(
        "backup.uploading",
        "uploading snapshot files",
        Some(fields(&[("backup", name.as_str()), ("mode", &mode.to_string())])),
    );

    let snapshot_dirs = deps.cassandra.find_snapshot_dirs(ctx, tag.to_owned()).await?;
    let mut manifest = Manifest::new();
    let mut uploaded_count = 0usize;
    for dir in snapshot_dirs {
        let files = files_in(&dir.path)?;
        let (retained, already_in_manifest) =
            cache.replace_or_remove(&dir.keyspace, &dir.table, files)?;

        let mut uploads = Vec::new();
        let mut objects: Vec<ManifestObject> = Vec::new();
        for entry in retained {
            match entry {
                Retained::Upload(path) => uploads.push(path),
                Retained::Reference(object) => objects.push(object),
            }
        }

        let dest = layout.table_data_dir(fqdn, name, mode, &dir.keyspace, &dir.table);
        let stored = storage.upload_many(ctx, uploads, dest).await?;
        uploaded_count += stored.len();
        objects.extend(
            stored
                .into_iter()
                .map(|object| to_manifest_object(storage.as_ref(), &layout, object)),
        );
        objects.extend(already_in_manifest);
        objects.sort_by(|a, b| a.path.cmp(&b.path));

        manifest.push(ManifestSection {
            keyspace: dir.keyspace,
            columnfamily: dir.table,
            objects,
        });
    }

    deps.logger.info(
        "backup.indexing",
        "writing the manifest and index entries",
        Some(fields(&[("backup", name.as_str())])),
    );
    let manifest_json = manifest.to_json()?;
    let manifest_object = storage
        .upload_from_string(ctx, layout.manifest_path(fqdn, name), manifest_json.clone())
        .await?;
    let finished_ms = manifest_object.time_ms().unwrap_or_else(now_epoch_ms);
    deps.catalog
        .record_backup_finish(ctx, fqdn, name, &manifest_json, &tokenmap_json, finished_ms)
        .await?;

    deps.logger.info(
        "backup.done",
        "backup finished",
        Some(fields(&[("backup", name.as_str())])),
    );

    Ok(BackupNodeReport {
        name: name.clone(),
        started_ms,
        finished_ms,
        sections: manifest.len(),
        objects: manifest.object_count(),
        total_size: manifest.total_size(),
        replaced: cache.replaced_count(),
        uploaded: uploaded_count,
    })
}

/// Convert a stored object into its manifest entry: the path is the
/// storage path suffix starting at the node fqdn.
pub(crate) fn to_manifest_object(
    storage: &dyn StoragePort,
    layout: &ringvault_domain::BackupLayout,
    object: StoredObject,
) -> ManifestObject {
    let backend_prefix = storage.path_prefix();
    let storage_relative = object
        .name
        .strip_prefix(&backend_prefix)
        .unwrap_or(&object.name);
    ManifestObject {
        path: layout.manifest_relative(storage_relative).to_owned(),
        md5: object.hash,
        size: object.size,
    }
}

async fn wait_for_stagger(
    ctx: &RequestContext,
    deps: &BackupNodeDeps,
    fqdn: &NodeFqdn,
    tokenmap: &TokenMap,
    window: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        ctx.ensure_not_cancelled("backup.stagger")?;
        if stagger_ready(ctx, &deps.catalog, fqdn, tokenmap).await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ErrorEnvelope::expected(
                ErrorCode::stagger_timeout(),
                format!("stagger window elapsed before {fqdn} was allowed to start"),
            ));
        }
        tokio::select! {
            () = ctx.cancelled() => {
                return Err(ErrorEnvelope::cancelled("operation cancelled"));
            }
            () = tokio::time::sleep(deps.stagger_poll) => {}
        }
    }
}

/// The stagger predicate: a node may start once it already has a
/// finished backup, is the lowest node in canonical token order, or
/// its ring predecessor has a finished backup.
pub async fn stagger_ready(
    ctx: &RequestContext,
    catalog: &Catalog,
    fqdn: &NodeFqdn,
    tokenmap: &TokenMap,
) -> Result<bool> {
    if has_finished_backup(ctx, catalog, fqdn).await? {
        return Ok(true);
    }

    let ordered = tokenmap.hosts_in_token_order();
    match ordered.first() {
        Some(first) if first.as_str() == fqdn.as_str() => return Ok(true),
        Some(_) => {},
        // An empty tokenmap gives nothing to wait for.
        None => return Ok(true),
    }

    match tokenmap.predecessor_of(fqdn.as_str()) {
        Some(predecessor) => {
            let predecessor = NodeFqdn::parse(&predecessor).map_err(ErrorEnvelope::from)?;
            has_finished_backup(ctx, catalog, &predecessor).await
        },
        // A node outside the tokenmap has no predecessor to wait for.
        None => Ok(true),
    }
}

async fn has_finished_backup(
    ctx: &RequestContext,
    catalog: &Catalog,
    fqdn: &NodeFqdn,
) -> Result<bool> {
    let records = catalog.list_node_backups(ctx, Some(fqdn)).await?;
    Ok(records.iter().any(|record| record.finished_ms.is_some()))
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(ErrorEnvelope::from)? {
        let entry = entry.map_err(ErrorEnvelope::from)?;
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}
