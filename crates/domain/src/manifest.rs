//! Backup manifest value objects.
//!
//! A manifest is the ordered list of `(keyspace, columnfamily)`
//! sections recorded at the end of a node backup. Object paths are
//! storage-relative from the node-backup root, i.e. they start at the
//! node's fqdn. The digest field serializes as `MD5` and carries the
//! base64 encoding of the raw 128-bit digest.

use serde::{Deserialize, Serialize};
use ringvault_shared::{ErrorCode, ErrorEnvelope, Result};

/// One stored object referenced by a manifest section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestObject {
    /// Storage-relative path, starting at the node fqdn.
    pub path: String,
    /// Base64-encoded MD5 digest.
    #[serde(rename = "MD5")]
    pub md5: String,
    /// Object size in bytes.
    pub size: u64,
}

impl ManifestObject {
    /// Final path segment of the object (the SSTable file name).
    #[must_use]
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// All objects of one table captured by a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSection {
    /// Keyspace name.
    pub keyspace: String,
    /// Table directory name (may carry the table id suffix).
    pub columnfamily: String,
    /// Objects captured for this table.
    pub objects: Vec<ManifestObject>,
}

/// Ordered sequence of manifest sections, persisted as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    sections: Vec<ManifestSection>,
}

impl Manifest {
    /// Create an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section.
    pub fn push(&mut self, section: ManifestSection) {
        self.sections.push(section);
    }

    /// Borrow the sections in order.
    #[must_use]
    pub fn sections(&self) -> &[ManifestSection] {
        &self.sections
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true when the manifest has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Iterate over every object of every section.
    pub fn objects(&self) -> impl Iterator<Item = &ManifestObject> {
        self.sections.iter().flat_map(|section| section.objects.iter())
    }

    /// Total size of all referenced objects in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.objects().map(|object| object.size).sum()
    }

    /// Total number of referenced objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects().count()
    }

    /// Parse a manifest from its JSON encoding.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("domain", "invalid_manifest"),
                format!("manifest is not valid JSON: {error}"),
            )
        })
    }

    /// Encode the manifest as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|error| {
            ErrorEnvelope::invariant(
                ErrorCode::internal(),
                format!("manifest serialization failed: {error}"),
            )
        })
    }
}
