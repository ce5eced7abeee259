//! Local filesystem storage driver.
//!
//! Objects live under `<base_path>/<bucket_name>/` and object names
//! are absolute filesystem paths. Content digests are computed on
//! every put and listing, so the driver always reports
//! content-addressable hashes.

use ringvault_ports::{BoxFuture, StoragePort, StoredObject};
use ringvault_shared::{
    md5_base64, md5_base64_file, ErrorCode, ErrorEnvelope, RequestContext, Result, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Storage driver rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: Arc<PathBuf>,
    pool: WorkerPool,
}

impl LocalStorage {
    /// Create a driver for `<base_path>/<bucket_name>`.
    pub fn new(base_path: &Path, bucket_name: &str) -> Result<Self> {
        let root = base_path.join(bucket_name);
        std::fs::create_dir_all(&root).map_err(ErrorEnvelope::from)?;
        Ok(Self {
            root: Arc::new(root),
            pool: WorkerPool::with_default_width(),
        })
    }

    /// The bucket root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn describe(absolute: &Path) -> Result<StoredObject> {
        let metadata = std::fs::metadata(absolute).map_err(ErrorEnvelope::from)?;
        if !metadata.is_file() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::not_found(),
                format!("{} is not an object", absolute.display()),
            ));
        }
        let hash = md5_base64_file(absolute)?;
        Ok(StoredObject {
            name: absolute.display().to_string(),
            size: metadata.len(),
            hash,
            created_ms: system_time_ms(metadata.created().ok()),
            modified_ms: system_time_ms(metadata.modified().ok()),
        })
    }
}

fn system_time_ms(time: Option<std::time::SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| u64::try_from(d.as_millis()).ok())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(error) => return Err(ErrorEnvelope::from(error)),
        };
        for entry in entries {
            let entry = entry.map_err(ErrorEnvelope::from)?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}

impl StoragePort for LocalStorage {
    fn provider(&self) -> &str {
        "local"
    }

    fn list(
        &self,
        _ctx: &RequestContext,
        prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        let root = Arc::clone(&self.root);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut objects = Vec::new();
                for path in walk_files(&root)? {
                    let relative = path
                        .strip_prefix(root.as_path())
                        .map_err(|_| {
                            ErrorEnvelope::invariant(
                                ErrorCode::internal(),
                                "walked file escaped the bucket root",
                            )
                        })?
                        .to_string_lossy()
                        .replace('\\', "/");
                    if relative.starts_with(&prefix) {
                        objects.push(Self::describe(&path)?);
                    }
                }
                Ok(objects)
            })
            .await
            .map_err(join_error)?
        })
    }

    fn get(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<StoredObject>> {
        let absolute = self.absolute(&path);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::describe(&absolute))
                .await
                .map_err(join_error)?
        })
    }

    fn get_as_bytes(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<Vec<u8>>> {
        let absolute = self.absolute(&path);
        Box::pin(async move { tokio::fs::read(&absolute).await.map_err(ErrorEnvelope::from) })
    }

    fn get_as_string(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<String>> {
        let absolute = self.absolute(&path);
        Box::pin(async move {
            tokio::fs::read_to_string(&absolute)
                .await
                .map_err(ErrorEnvelope::from)
        })
    }

    fn upload_from_string(
        &self,
        _ctx: &RequestContext,
        path: String,
        content: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        let absolute = self.absolute(&path);
        Box::pin(async move {
            if let Some(parent) = absolute.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(ErrorEnvelope::from)?;
            }
            tokio::fs::write(&absolute, content.as_bytes())
                .await
                .map_err(ErrorEnvelope::from)?;
            let metadata = tokio::fs::metadata(&absolute)
                .await
                .map_err(ErrorEnvelope::from)?;
            Ok(StoredObject {
                name: absolute.display().to_string(),
                size: metadata.len(),
                hash: md5_base64(content.as_bytes()),
                created_ms: system_time_ms(metadata.created().ok()),
                modified_ms: system_time_ms(metadata.modified().ok()),
            })
        })
    }

    fn upload_file(
        &self,
        _ctx: &RequestContext,
        local: PathBuf,
        dest: String,
    ) -> BoxFuture<'_, Result<StoredObject>> {
        let absolute = self.absolute(&dest);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if let Some(parent) = absolute.parent() {
                    std::fs::create_dir_all(parent).map_err(ErrorEnvelope::from)?;
                }
                std::fs::copy(&local, &absolute).map_err(ErrorEnvelope::from)?;
                Self::describe(&absolute)
            })
            .await
            .map_err(join_error)?
        })
    }

    fn upload_many(
        &self,
        ctx: &RequestContext,
        srcs: Vec<PathBuf>,
        dest_prefix: String,
    ) -> BoxFuture<'_, Result<Vec<StoredObject>>> {
        let pool = self.pool;
        let driver = self.clone();
        let caller_ctx = ctx.clone();
        let worker_ctx = ctx.clone();
        Box::pin(async move {
            pool.map(&caller_ctx, srcs, move |src| {
                let driver = driver.clone();
                let ctx = worker_ctx.clone();
                let dest_prefix = dest_prefix.clone();
                async move {
                    let basename = file_basename(&src)?;
                    driver
                        .upload_file(&ctx, src, format!("{dest_prefix}/{basename}"))
                        .await
                }
            })
            .await
        })
    }

    fn download_many(
        &self,
        _ctx: &RequestContext,
        srcs: Vec<String>,
        dest_dir: PathBuf,
    ) -> BoxFuture<'_, Result<()>> {
        let root = Arc::clone(&self.root);
        Box::pin(async move {
            tokio::fs::create_dir_all(&dest_dir)
                .await
                .map_err(ErrorEnvelope::from)?;
            for src in srcs {
                let absolute = root.join(&src);
                let basename = src.rsplit('/').next().unwrap_or(&src).to_owned();
                tokio::fs::copy(&absolute, dest_dir.join(basename))
                    .await
                    .map_err(ErrorEnvelope::from)?;
            }
            Ok(())
        })
    }

    fn delete(&self, _ctx: &RequestContext, path: String) -> BoxFuture<'_, Result<()>> {
        let absolute = self.absolute(&path);
        Box::pin(async move {
            match tokio::fs::remove_file(&absolute).await {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(ErrorEnvelope::from(error)),
            }
        })
    }

    fn path_prefix(&self) -> String {
        format!("{}/", self.root.display())
    }

    fn reports_content_hashes_on_put(&self) -> bool {
        true
    }
}

fn file_basename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                format!("{} has no file name", path.display()),
            )
        })
}

fn join_error(error: tokio::task::JoinError) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::internal(),
        error.to_string(),
        ringvault_shared::ErrorClass::NonRetriable,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringvault_shared::hashes_match;

    fn temp_driver(tag: &str) -> (LocalStorage, PathBuf) {
        let base = std::env::temp_dir().join(format!("ringvault_local_{tag}_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&base).expect("create temp base");
        let driver = LocalStorage::new(&base, "bucket").expect("create driver");
        (driver, base)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() -> Result<()> {
        let ctx = RequestContext::new_op();
        let (driver, _base) = temp_driver("round_trip");

        let object = driver
            .upload_from_string(&ctx, "n1/bk1/meta/schema.cql".to_owned(), "CREATE ...".to_owned())
            .await?;
        assert!(hashes_match(&object.hash, &md5_base64(b"CREATE ...")));

        let body = driver
            .get_as_string(&ctx, "n1/bk1/meta/schema.cql".to_owned())
            .await?;
        assert_eq!(body, "CREATE ...");
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_prefix() -> Result<()> {
        let ctx = RequestContext::new_op();
        let (driver, _base) = temp_driver("list");

        driver
            .upload_from_string(&ctx, "n1/bk1/meta/schema.cql".to_owned(), "a".to_owned())
            .await?;
        driver
            .upload_from_string(&ctx, "n1/bk2/meta/schema.cql".to_owned(), "b".to_owned())
            .await?;

        let all = driver.list(&ctx, "n1/".to_owned()).await?;
        assert_eq!(all.len(), 2);
        let bk1 = driver.list(&ctx, "n1/bk1/".to_owned()).await?;
        assert_eq!(bk1.len(), 1);
        assert!(bk1[0].name.ends_with("n1/bk1/meta/schema.cql"));
        Ok(())
    }

    #[tokio::test]
    async fn upload_many_lands_under_the_prefix() -> Result<()> {
        let ctx = RequestContext::new_op();
        let (driver, base) = temp_driver("upload_many");

        let src_dir = base.join("sstables");
        std::fs::create_dir_all(&src_dir).map_err(ErrorEnvelope::from)?;
        let mut srcs = Vec::new();
        for index in 0..4 {
            let path = src_dir.join(format!("na-{index}-big-Data.db"));
            std::fs::write(&path, vec![index as u8; 128]).map_err(ErrorEnvelope::from)?;
            srcs.push(path);
        }

        let uploaded = driver
            .upload_many(&ctx, srcs, "n1/bk1/data/ks/t".to_owned())
            .await?;
        assert_eq!(uploaded.len(), 4);
        for object in &uploaded {
            assert!(object.name.contains("n1/bk1/data/ks/t/na-"));
            assert_eq!(object.size, 128);
        }
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<()> {
        let ctx = RequestContext::new_op();
        let (driver, _base) = temp_driver("delete");

        driver
            .upload_from_string(&ctx, "n1/bk1/meta/manifest.json".to_owned(), "[]".to_owned())
            .await?;
        driver.delete(&ctx, "n1/bk1/meta/manifest.json".to_owned()).await?;
        driver.delete(&ctx, "n1/bk1/meta/manifest.json".to_owned()).await?;
        assert!(driver
            .get(&ctx, "n1/bk1/meta/manifest.json".to_owned())
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn path_prefix_reconstructs_object_names() -> Result<()> {
        let ctx = RequestContext::new_op();
        let (driver, _base) = temp_driver("prefix");

        let object = driver
            .upload_from_string(&ctx, "n1/bk1/data/ks/t/f.db".to_owned(), "x".to_owned())
            .await?;
        let reconstructed = format!("{}{}", driver.path_prefix(), "n1/bk1/data/ks/t/f.db");
        assert_eq!(object.name, reconstructed);
        Ok(())
    }
}
