//! In-memory storage port double.

use ringvault_ports::{BoxFuture, StoragePort, StoredObject};
use ringvault_shared::{md5_base64, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Blob {
    data: Vec<u8>,
    hash: String,
    created_ms: u64,
    modified_ms: u64,
}

/// An in-memory object store with a deterministic clock.
///
/// Object names are storage-relative (cloud-style); every write ticks
/// the clock by one second so creation-time ordering is stable in
/// tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    objects: Arc<Mutex<BTreeMap<String, Blob>>>,
    clock_ms: Arc<AtomicU64>,
}

impl InMemoryStorage {
    /// Create an empty store with the clock at a fixed epoch.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        store.clock_ms.store(1_700_000_000_000, Ordering::SeqCst);
        store
    }

    fn tick(&self) -> u64 {
        self.clock_ms.fetch_add(1_000, Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Blob>>> {
        self.objects
            .lock()
            .map_err(|_| ErrorEnvelope::invariant(ErrorCode::internal(), "store lock poisoned"))
    }

    fn put(&self, path: &str, data: Vec<u8>) -> Result<StoredObject> {
        let now = self.tick();
        let mut guard = self.lock()?;
        let created_ms = guard.get(path).map_or(now, |existing| existing.created_ms);
        let blob = Blob {
            hash: md5_base64(&data),
            created_ms,
            modified_ms: now,
            data,
        };
        let object = describe(path, &blob);
        guard.insert(path.to_owned(), blob);
        Ok(object)
    }

    /// Insert raw bytes directly (test seeding).
    pub fn seed(&self, path: &str, data: &[u8]) -> Result<StoredObject> {
        self.put(path, data.to_vec())
    }

    /// Remove the final byte of an object, recomputing its hash.
    pub fn truncate_by_one(&self, path: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let blob = guard
            .get_mut(path)
            .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), path.to_owned()))?;
        blob.data.pop();
        blob.hash = md5_base64(&blob.data);
        Ok(())
    }

    /// Flip a byte in place (same size, different content and hash).
    pub fn flip_first_byte(&self, path: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let blob = guard
            .get_mut(path)
            .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), path.to_owned()))?;
        if let Some(byte) = blob.data.first_mut() {
            *byte = byte.wrapping_add(1);
        }
        blob.hash = md5_base64(&blob.data);
        Ok(())
    }

    /// Record a hash for an object without changing its content
    /// (simulates a backend reporting a stale digest).
    pub fn override_hash(&self, path: &str, hash: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let blob = guard
            .get_mut(path)
            .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), path.to_owned()))?;
        blob.hash = hash.to_owned();
        Ok(())
    }

    /// Delete every object under a prefix; returns how many went away.
    pub fn purge_prefix(&self, prefix: &str) -> Result<usize> {
        let mut guard = self.lock()?;
        let doomed: Vec<String> = guard
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &doomed {
            guard.remove(name);
        }
        Ok(doomed.len())
    }

    /// All object names currently stored.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        self.lock().map(|guard| guard.keys().cloned().collect()).unwrap_or_default()
    }
}

fn describe(path: &str, blob: &Blob) -> StoredObject {
    StoredObject {
        name: path.to_owned(),
        size: blob.data.len() as u64,
        hash: blob.hash.clone(),
        created_ms: Some(blob.created_ms),
        modified_ms: Some(blob.modified_ms),
    }
}

impl StoragePort for InMemoryStorage {
    fn provider(&self) -> &str {
        "memory"
    }

    fn list(
        &self,
        _ctx: &RequestContext,
        prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        Box::pin(async move {
            let guard = self.lock()?;
            Ok(guard
                .iter()
                .filter(|(name, _)| name.starts_with(&prefix))
                .map(|(name, blob)| describe(name, blob))
                .collect())
        })
    }

    fn get(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<StoredObject>> {
        Box::pin(async move {
            let guard = self.lock()?;
            guard
                .get(&path)
                .map(|blob| describe(&path, blob))
                .ok_or_else(|| {
                    ErrorEnvelope::expected(ErrorCode::not_found(), format!("no object at {path}"))
                })
        })
    }

    fn get_as_bytes(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            let guard = self.lock()?;
            guard.get(&path).map(|blob| blob.data.clone()).ok_or_else(|| {
                ErrorEnvelope::expected(ErrorCode::not_found(), format!("no object at {path}"))
            })
        })
    }

    fn get_as_string(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<String>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let bytes = self.get_as_bytes(&ctx, path).await?;
            String::from_utf8(bytes).map_err(|error| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("object is not UTF-8: {error}"),
                )
            })
        })
    }

    fn upload_from_string(
        &self,
        _ctx: &RequestContext,
        path: String,
        content: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        Box::pin(async move { self.put(&path, content.into_bytes()) })
    }

    fn upload_file(
        &self,
        _ctx: &RequestContext,
        local: PathBuf,
        dest: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        Box::pin(async move {
            let data = std::fs::read(&local).map_err(ErrorEnvelope::from)?;
            self.put(&dest, data)
        })
    }

    fn upload_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<PathBuf>,
        dest_prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let mut uploaded = Vec::with_capacity(srcs.len());
            for src in srcs {
                let basename = src
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        ErrorEnvelope::expected(
                            ErrorCode::invalid_input(),
                            format!("{} has no file name", src.display()),
                        )
                    })?;
                uploaded.push(
                    self.upload_file(&ctx, src, format!("{dest_prefix}/{basename}"))
                        .await?,
                );
            }
            Ok(uploaded)
        })
    }

    fn download_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<String>,
        dest_dir: PathBuf,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            std::fs::create_dir_all(&dest_dir).map_err(ErrorEnvelope::from)?;
            for src in srcs {
                let bytes = self.get_as_bytes(&ctx, src.clone()).await?;
                let basename = src.rsplit('/').next().unwrap_or(&src).to_owned();
                std::fs::write(dest_dir.join(basename), bytes).map_err(ErrorEnvelope::from)?;
            }
            Ok(())
        })
    }

    fn delete(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.lock()?;
            guard.remove(&path);
            Ok(())
        })
    }

    fn path_prefix(&self) -> String {
        String::new()
    }
}
