//! Object storage boundary contract.

use crate::BoxFuture;
use ringvault_shared::{RequestContext, Result};
use std::path::PathBuf;

/// Metadata of one stored object as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Backend object name. For cloud backends this is the
    /// storage-relative path; for the local backend it is the absolute
    /// filesystem path.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Backend-reported content digest (hex or base64 MD5).
    pub hash: String,
    /// Creation time in milliseconds since the epoch, when known.
    pub created_ms: Option<u64>,
    /// Last modification time in milliseconds since the epoch.
    pub modified_ms: Option<u64>,
}

impl StoredObject {
    /// Best available object time: creation, falling back to
    /// modification.
    #[must_use]
    pub fn time_ms(&self) -> Option<u64> {
        self.created_ms.or(self.modified_ms)
    }
}

/// Boundary contract for object storage backends.
///
/// Paths are storage-relative (cluster prefix already applied by the
/// caller). `list` order is unspecified; callers sort. `upload_many`
/// runs a bounded worker pool and treats its result as a set.
pub trait StoragePort: Send + Sync {
    /// Stable provider identifier (`gcs`, `local`, ...).
    fn provider(&self) -> &str;

    /// List every object whose name starts with `prefix`.
    fn list(&self, ctx: &RequestContext, prefix: String)
        -> BoxFuture<'_, Result<Vec<StoredObject>>>;

    /// Fetch the metadata of a single object.
    fn get(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<StoredObject>>;

    /// Download an object into memory.
    fn get_as_bytes(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Download an object as UTF-8 text.
    fn get_as_string(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<String>>;

    /// Upload a string body, returning the stored object metadata.
    fn upload_from_string(
        &self,
        ctx: &RequestContext,
        path: String,
        content: String,
    ) -> BoxFuture<'_, Result<StoredObject>>;

    /// Upload a single local file to `dest` (full object path).
    fn upload_file(
        &self,
        ctx: &RequestContext,
        local: PathBuf,
        dest: String,
    ) -> BoxFuture<'_, Result<StoredObject>>;

    /// Upload many local files under `dest_prefix`, concurrently with
    /// a bounded pool. Each file lands at `<dest_prefix>/<basename>`.
    /// Any failure fails the whole call; partial uploads may remain
    /// and are overwritten on retry or reclaimed by purge.
    fn upload_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<PathBuf>,
        dest_prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>>;

    /// Download many objects into `dest_dir`, one file per object
    /// basename.
    fn download_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<String>,
        dest_dir: PathBuf,
    ) -> BoxFuture<'_, Result<()>>;

    /// Delete a single object.
    fn delete(&self, ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<()>>;

    /// The string to prepend to a storage-relative path to obtain the
    /// backend object name space: empty for cloud backends, the
    /// filesystem mount prefix for the local backend.
    fn path_prefix(&self) -> String;

    /// Returns true when put operations already report content
    /// digests cheaply (local backend), letting callers skip local
    /// MD5 computation in the dedup cache.
    fn reports_content_hashes_on_put(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_time_prefers_creation() {
        let object = StoredObject {
            name: "n1/bk1/meta/schema.cql".to_owned(),
            size: 10,
            hash: "abc".to_owned(),
            created_ms: Some(1_000),
            modified_ms: Some(2_000),
        };
        assert_eq!(object.time_ms(), Some(1_000));

        let modified_only = StoredObject {
            created_ms: None,
            ..object
        };
        assert_eq!(modified_only.time_ms(), Some(2_000));
    }
}
