//! One node's backup: identity, meta objects, and cached loads.

use ringvault_domain::{BackupLayout, BackupMode, BackupName, Manifest, NodeFqdn, TokenMap};
use ringvault_ports::StoragePort;
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LoadedBlobs {
    manifest: Option<Manifest>,
    schema: Option<String>,
    tokenmap: Option<TokenMap>,
    started_ms: Option<Option<u64>>,
    finished_ms: Option<Option<u64>>,
}

/// A node backup identified by `(fqdn, name)`.
///
/// Construction is pure path math; every storage access is an explicit
/// load with the result cached. The manifest object's presence is the
/// sole completeness signal.
pub struct NodeBackup {
    storage: Arc<dyn StoragePort>,
    layout: BackupLayout,
    fqdn: NodeFqdn,
    name: BackupName,
    blobs: Mutex<LoadedBlobs>,
}

impl NodeBackup {
    /// Create a handle to a (possibly absent) node backup.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StoragePort>,
        layout: BackupLayout,
        fqdn: NodeFqdn,
        name: BackupName,
    ) -> Self {
        Self {
            storage,
            layout,
            fqdn,
            name,
            blobs: Mutex::new(LoadedBlobs::default()),
        }
    }

    /// Create a handle with already-known event times (index-backed
    /// listings carry them in timestamp objects).
    #[must_use]
    pub fn with_times(
        storage: Arc<dyn StoragePort>,
        layout: BackupLayout,
        fqdn: NodeFqdn,
        name: BackupName,
        started_ms: Option<u64>,
        finished_ms: Option<u64>,
    ) -> Self {
        let backup = Self::new(storage, layout, fqdn, name);
        if let Ok(mut blobs) = backup.blobs.lock() {
            blobs.started_ms = Some(started_ms);
            blobs.finished_ms = Some(finished_ms);
        }
        backup
    }

    /// The node this backup belongs to.
    #[must_use]
    pub fn fqdn(&self) -> &NodeFqdn {
        &self.fqdn
    }

    /// The backup name.
    #[must_use]
    pub fn name(&self) -> &BackupName {
        &self.name
    }

    /// Storage path of the schema object.
    #[must_use]
    pub fn schema_path(&self) -> String {
        self.layout.schema_path(&self.fqdn, &self.name)
    }

    /// Storage path of the tokenmap object.
    #[must_use]
    pub fn tokenmap_path(&self) -> String {
        self.layout.tokenmap_path(&self.fqdn, &self.name)
    }

    /// Storage path of the manifest object.
    #[must_use]
    pub fn manifest_path(&self) -> String {
        self.layout.manifest_path(&self.fqdn, &self.name)
    }

    /// Data directory of this backup for a given mode.
    #[must_use]
    pub fn data_dir(&self, mode: BackupMode) -> String {
        self.layout.data_dir(&self.fqdn, &self.name, mode)
    }

    /// Returns true when the schema object exists (the backup was at
    /// least started).
    pub async fn exists(&self, ctx: &RequestContext) -> Result<bool> {
        match self.storage.get(ctx, self.schema_path()).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Creation time of the schema object, when present.
    pub async fn started_ms(&self, ctx: &RequestContext) -> Result<Option<u64>> {
        if let Some(cached) = self.cached(|blobs| blobs.started_ms) {
            return Ok(cached);
        }
        let value = match self.storage.get(ctx, self.schema_path()).await {
            Ok(object) => object.time_ms(),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error),
        };
        self.store(|blobs| blobs.started_ms = Some(value));
        Ok(value)
    }

    /// Creation time of the manifest object; `None` means the backup
    /// never finished.
    pub async fn finished_ms(&self, ctx: &RequestContext) -> Result<Option<u64>> {
        if let Some(cached) = self.cached(|blobs| blobs.finished_ms) {
            return Ok(cached);
        }
        let value = match self.storage.get(ctx, self.manifest_path()).await {
            Ok(object) => object.time_ms(),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error),
        };
        self.store(|blobs| blobs.finished_ms = Some(value));
        Ok(value)
    }

    /// Load (and cache) the manifest.
    pub async fn manifest(&self, ctx: &RequestContext) -> Result<Manifest> {
        if let Some(cached) = self.cached(|blobs| blobs.manifest.clone()) {
            return Ok(cached);
        }
        let raw = self.storage.get_as_string(ctx, self.manifest_path()).await?;
        let manifest = Manifest::from_json(&raw)?;
        self.store(|blobs| blobs.manifest = Some(manifest.clone()));
        Ok(manifest)
    }

    /// Load (and cache) the schema dump.
    pub async fn schema(&self, ctx: &RequestContext) -> Result<String> {
        if let Some(cached) = self.cached(|blobs| blobs.schema.clone()) {
            return Ok(cached);
        }
        let raw = self.storage.get_as_string(ctx, self.schema_path()).await?;
        self.store(|blobs| blobs.schema = Some(raw.clone()));
        Ok(raw)
    }

    /// Load (and cache) the tokenmap.
    pub async fn tokenmap(&self, ctx: &RequestContext) -> Result<TokenMap> {
        if let Some(cached) = self.cached(|blobs| blobs.tokenmap.clone()) {
            return Ok(cached);
        }
        let raw = self.storage.get_as_string(ctx, self.tokenmap_path()).await?;
        let tokenmap = TokenMap::from_json(&raw)?;
        self.store(|blobs| blobs.tokenmap = Some(tokenmap.clone()));
        Ok(tokenmap)
    }

    /// Whether this backup's data objects live in the shared node
    /// pool. Derived from the manifest paths; an empty manifest counts
    /// as full.
    pub async fn is_incremental(&self, ctx: &RequestContext) -> Result<bool> {
        let manifest = self.manifest(ctx).await?;
        let pool_prefix = format!("{}/data/", self.fqdn);
        let result = manifest
            .objects()
            .next()
            .is_some_and(|object| object.path.starts_with(&pool_prefix));
        Ok(result)
    }

    /// Tokens this node owned when the backup was taken.
    pub async fn tokens(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        let tokenmap = self.tokenmap(ctx).await?;
        let entry = tokenmap.get(self.fqdn.as_str()).ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::not_found(),
                format!("{} is missing from its own backup tokenmap", self.fqdn),
            )
        })?;
        Ok(entry.tokens.clone())
    }

    fn cached<T>(&self, read: impl FnOnce(&LoadedBlobs) -> Option<T>) -> Option<T> {
        self.blobs.lock().ok().and_then(|blobs| read(&blobs))
    }

    fn store(&self, write: impl FnOnce(&mut LoadedBlobs)) {
        if let Ok(mut blobs) = self.blobs.lock() {
            write(&mut blobs);
        }
    }
}

impl std::fmt::Debug for NodeBackup {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NodeBackup")
            .field("fqdn", &self.fqdn)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
