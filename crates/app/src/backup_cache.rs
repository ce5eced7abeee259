//! Previous-backup dedup cache for SSTable uploads.
//!
//! Before uploading a snapshot file the engine consults the previous
//! node backup's manifest. A hit never reads storage; it substitutes
//! the cached object's path into the new manifest, or (between two
//! incremental backups) simply re-introduces the cached object that is
//! still reachable in the shared data pool.

use crate::catalog::NodeBackup;
use ringvault_domain::{BackupMode, Manifest, ManifestObject};
use ringvault_shared::{md5_base64_file, ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// File names that are never substituted from a previous backup.
const NEVER_CACHED: &[&str] = &["manifest.json"];

/// Outcome for one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retained {
    /// The file must be uploaded.
    Upload(PathBuf),
    /// The previously-uploaded object stands in for the file; it goes
    /// into the new manifest as-is, no upload.
    Reference(ManifestObject),
}

/// Dedup cache seeded from the previous node backup's manifest.
#[derive(Debug)]
pub struct NodeBackupCache {
    cached: BTreeMap<(String, String, String), ManifestObject>,
    previous_is_incremental: bool,
    current_mode: BackupMode,
    skip_md5: bool,
    replaced: u32,
}

impl NodeBackupCache {
    /// An empty cache (first backup of a node).
    #[must_use]
    pub fn empty(current_mode: BackupMode) -> Self {
        Self {
            cached: BTreeMap::new(),
            previous_is_incremental: false,
            current_mode,
            skip_md5: false,
            replaced: 0,
        }
    }

    /// Seed the cache from a previous backup, when one exists.
    ///
    /// `skip_md5` should be set for backends that report content
    /// hashes on put anyway (the local driver); skipping the local
    /// digest there is a performance choice, not a correctness one.
    pub async fn seed(
        ctx: &RequestContext,
        previous: Option<&NodeBackup>,
        current_mode: BackupMode,
        skip_md5: bool,
    ) -> Result<Self> {
        let Some(previous) = previous else {
            return Ok(Self {
                skip_md5,
                ..Self::empty(current_mode)
            });
        };

        let manifest: Manifest = previous.manifest(ctx).await?;
        let previous_is_incremental = previous.is_incremental(ctx).await?;
        let mut cached = BTreeMap::new();
        for section in manifest.sections() {
            for object in &section.objects {
                cached.insert(
                    (
                        section.keyspace.clone(),
                        section.columnfamily.clone(),
                        object.basename().to_owned(),
                    ),
                    object.clone(),
                );
            }
        }
        Ok(Self {
            cached,
            previous_is_incremental,
            current_mode,
            skip_md5,
            replaced: 0,
        })
    }

    /// Number of files replaced by cache hits so far (reporting only).
    #[must_use]
    pub const fn replaced_count(&self) -> u32 {
        self.replaced
    }

    /// Split candidate files into uploads, path substitutions, and
    /// objects already reachable in the shared incremental pool.
    ///
    /// Returns `(retained, already_in_manifest)`.
    pub fn replace_or_remove(
        &mut self,
        keyspace: &str,
        table: &str,
        srcs: Vec<PathBuf>,
    ) -> Result<(Vec<Retained>, Vec<ManifestObject>)> {
        let mut retained = Vec::with_capacity(srcs.len());
        let mut already_in_manifest = Vec::new();

        for src in srcs {
            let basename = src
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            // NEVER_CACHED wins even over a manifest hit.
            if NEVER_CACHED.contains(&basename.as_str()) {
                retained.push(Retained::Upload(src));
                continue;
            }

            let key = (keyspace.to_owned(), table.to_owned(), basename);
            let Some(cached) = self.cached.get(&key) else {
                retained.push(Retained::Upload(src));
                continue;
            };

            let metadata = std::fs::metadata(&src).map_err(ErrorEnvelope::from)?;
            if metadata.len() != cached.size {
                retained.push(Retained::Upload(src));
                continue;
            }

            if !self.skip_md5 && md5_base64_file(&src)? != cached.md5 {
                retained.push(Retained::Upload(src));
                continue;
            }

            self.replaced += 1;
            let both_incremental =
                self.previous_is_incremental && self.current_mode.is_incremental();
            if both_incremental {
                // The object is still reachable in the shared pool.
                already_in_manifest.push(cached.clone());
            } else {
                retained.push(Retained::Reference(cached.clone()));
            }
        }

        Ok((retained, already_in_manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringvault_domain::ManifestSection;
    use ringvault_shared::md5_base64;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ringvault_cache_{tag}_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn object_for(path: &str, payload: &[u8]) -> ManifestObject {
        ManifestObject {
            path: path.to_owned(),
            md5: md5_base64(payload),
            size: payload.len() as u64,
        }
    }

    fn seeded_cache(
        entries: Vec<(&str, &str, ManifestObject)>,
        previous_is_incremental: bool,
        current_mode: BackupMode,
        skip_md5: bool,
    ) -> NodeBackupCache {
        let mut cached = BTreeMap::new();
        for (keyspace, table, object) in entries {
            cached.insert(
                (
                    keyspace.to_owned(),
                    table.to_owned(),
                    object.basename().to_owned(),
                ),
                object,
            );
        }
        NodeBackupCache {
            cached,
            previous_is_incremental,
            current_mode,
            skip_md5,
            replaced: 0,
        }
    }

    #[test]
    fn empty_cache_uploads_everything() -> Result<()> {
        let dir = temp_dir("empty");
        let file = dir.join("na-1-big-Data.db");
        std::fs::write(&file, b"payload").map_err(ErrorEnvelope::from)?;

        let mut cache = NodeBackupCache::empty(BackupMode::Full);
        let (retained, already) = cache.replace_or_remove("ks", "t", vec![file.clone()])?;

        assert_eq!(retained, vec![Retained::Upload(file)]);
        assert!(already.is_empty());
        assert_eq!(cache.replaced_count(), 0);
        Ok(())
    }

    #[test]
    fn unchanged_file_becomes_a_reference_for_full_backups() -> Result<()> {
        let dir = temp_dir("hit_full");
        let payload = b"immutable sstable";
        let file = dir.join("na-2-big-Data.db");
        std::fs::write(&file, payload).map_err(ErrorEnvelope::from)?;

        let cached = object_for("n1/bk1/data/ks/t/na-2-big-Data.db", payload);
        let mut cache = seeded_cache(
            vec![("ks", "t", cached.clone())],
            false,
            BackupMode::Full,
            false,
        );
        let (retained, already) = cache.replace_or_remove("ks", "t", vec![file])?;

        assert_eq!(retained, vec![Retained::Reference(cached)]);
        assert!(already.is_empty());
        assert_eq!(cache.replaced_count(), 1);
        Ok(())
    }

    #[test]
    fn incremental_pair_reintroduces_the_pool_object() -> Result<()> {
        let dir = temp_dir("hit_incr");
        let payload = b"pool sstable";
        let file = dir.join("na-3-big-Data.db");
        std::fs::write(&file, payload).map_err(ErrorEnvelope::from)?;

        let cached = object_for("n1/data/ks/t/na-3-big-Data.db", payload);
        let mut cache = seeded_cache(
            vec![("ks", "t", cached.clone())],
            true,
            BackupMode::Incremental,
            false,
        );
        let (retained, already) = cache.replace_or_remove("ks", "t", vec![file])?;

        assert!(retained.is_empty());
        assert_eq!(already, vec![cached]);
        assert_eq!(cache.replaced_count(), 1);
        Ok(())
    }

    #[test]
    fn size_change_forces_reupload() -> Result<()> {
        let dir = temp_dir("size");
        let file = dir.join("na-4-big-Data.db");
        std::fs::write(&file, b"grown content").map_err(ErrorEnvelope::from)?;

        let cached = object_for("n1/bk1/data/ks/t/na-4-big-Data.db", b"old");
        let mut cache = seeded_cache(vec![("ks", "t", cached)], false, BackupMode::Full, false);
        let (retained, _) = cache.replace_or_remove("ks", "t", vec![file.clone()])?;

        assert_eq!(retained, vec![Retained::Upload(file)]);
        assert_eq!(cache.replaced_count(), 0);
        Ok(())
    }

    #[test]
    fn md5_mismatch_forces_reupload_unless_skipped() -> Result<()> {
        let dir = temp_dir("md5");
        let file = dir.join("na-5-big-Data.db");
        std::fs::write(&file, b"same len").map_err(ErrorEnvelope::from)?;

        // Same size, different content.
        let cached = object_for("n1/bk1/data/ks/t/na-5-big-Data.db", b"SAME LEN");

        let mut strict = seeded_cache(
            vec![("ks", "t", cached.clone())],
            false,
            BackupMode::Full,
            false,
        );
        let (retained, _) = strict.replace_or_remove("ks", "t", vec![file.clone()])?;
        assert_eq!(retained, vec![Retained::Upload(file.clone())]);

        let mut lenient = seeded_cache(vec![("ks", "t", cached)], false, BackupMode::Full, true);
        let (retained, _) = lenient.replace_or_remove("ks", "t", vec![file])?;
        assert!(matches!(retained[0], Retained::Reference(_)));
        Ok(())
    }

    #[test]
    fn never_cached_names_always_upload() -> Result<()> {
        let dir = temp_dir("never");
        let file = dir.join("manifest.json");
        std::fs::write(&file, b"[]").map_err(ErrorEnvelope::from)?;

        let cached = object_for("n1/bk1/data/ks/t/manifest.json", b"[]");
        let mut cache = seeded_cache(vec![("ks", "t", cached)], false, BackupMode::Full, false);
        let (retained, already) = cache.replace_or_remove("ks", "t", vec![file.clone()])?;

        assert_eq!(retained, vec![Retained::Upload(file)]);
        assert!(already.is_empty());
        assert_eq!(cache.replaced_count(), 0);
        Ok(())
    }
}
