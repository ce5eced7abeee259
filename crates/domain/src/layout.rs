//! Storage layout path math.
//!
//! Authoritative layout, relative to the cluster prefix:
//!
//! ```text
//! <fqdn>/<name>/meta/schema.cql
//! <fqdn>/<name>/meta/tokenmap.json
//! <fqdn>/<name>/meta/manifest.json
//! <fqdn>/<name>/data/<keyspace>/<table>/<file>   (full mode)
//! <fqdn>/data/<keyspace>/<table>/<file>          (incremental pool)
//! index/backup_index/<name>/{tokenmap,manifest,schema}_<fqdn>.<ext>
//! index/backup_index/<name>/{started,finished}_<fqdn>_<unix_ts>.timestamp
//! index/latest_backup/<fqdn>/{tokenmap.json,backup_name.txt}
//! ```
//!
//! Everything in here is pure string manipulation; no storage access.

use crate::primitives::{BackupName, NodeFqdn};
use ringvault_shared::{ErrorCode, ErrorEnvelope, Result};
use std::fmt;

/// Whether a backup owns its data objects or shares the node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Data objects live under the backup's own name prefix.
    Full,
    /// Data objects live in the per-node shared pool.
    Incremental,
}

impl BackupMode {
    /// Returns true for incremental mode.
    #[must_use]
    pub const fn is_incremental(self) -> bool {
        matches!(self, Self::Incremental)
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => formatter.write_str("full"),
            Self::Incremental => formatter.write_str("incremental"),
        }
    }
}

/// Index events recorded as zero-byte timestamp objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    /// Backup started (schema object written).
    Started,
    /// Backup finished (manifest object written).
    Finished,
}

impl IndexEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished => "finished",
        }
    }
}

/// A parsed `<event>_<fqdn>_<unix_ts>.timestamp` object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampEntry {
    /// Recorded event.
    pub event: IndexEvent,
    /// Node the event belongs to.
    pub fqdn: String,
    /// Seconds since the Unix epoch.
    pub seconds: u64,
}

/// Largest value accepted as "seconds since epoch"; anything bigger is
/// a unit mistake (milliseconds) and gets rejected at load time.
const MAX_EPOCH_SECONDS: u64 = 99_999_999_999;

/// Path builder for the backup storage layout under one cluster prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    prefix: String,
}

impl BackupLayout {
    /// Create a layout for a cluster prefix (may be empty).
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_owned(),
        }
    }

    /// The cluster prefix, without surrounding separators.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prepend the cluster prefix to a layout-relative path.
    #[must_use]
    pub fn join(&self, relative: &str) -> String {
        if self.prefix.is_empty() {
            relative.to_owned()
        } else {
            format!("{}/{relative}", self.prefix)
        }
    }

    /// Strip the cluster prefix from a storage path, yielding the
    /// manifest-relative path that starts at the fqdn.
    #[must_use]
    pub fn manifest_relative<'a>(&self, storage_path: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return storage_path;
        }
        storage_path
            .strip_prefix(&self.prefix)
            .map_or(storage_path, |rest| rest.trim_start_matches('/'))
    }

    /// Root of one node backup: `<prefix>/<fqdn>/<name>`.
    #[must_use]
    pub fn node_root(&self, fqdn: &NodeFqdn, name: &BackupName) -> String {
        self.join(&format!("{fqdn}/{name}"))
    }

    /// Meta directory of one node backup.
    #[must_use]
    pub fn meta_dir(&self, fqdn: &NodeFqdn, name: &BackupName) -> String {
        format!("{}/meta", self.node_root(fqdn, name))
    }

    /// Path of the schema object.
    #[must_use]
    pub fn schema_path(&self, fqdn: &NodeFqdn, name: &BackupName) -> String {
        format!("{}/schema.cql", self.meta_dir(fqdn, name))
    }

    /// Path of the tokenmap object.
    #[must_use]
    pub fn tokenmap_path(&self, fqdn: &NodeFqdn, name: &BackupName) -> String {
        format!("{}/tokenmap.json", self.meta_dir(fqdn, name))
    }

    /// Path of the manifest object.
    #[must_use]
    pub fn manifest_path(&self, fqdn: &NodeFqdn, name: &BackupName) -> String {
        format!("{}/manifest.json", self.meta_dir(fqdn, name))
    }

    /// Data directory for uploads of this backup.
    #[must_use]
    pub fn data_dir(&self, fqdn: &NodeFqdn, name: &BackupName, mode: BackupMode) -> String {
        match mode {
            BackupMode::Full => format!("{}/data", self.node_root(fqdn, name)),
            BackupMode::Incremental => self.join(&format!("{fqdn}/data")),
        }
    }

    /// Data directory of one table.
    #[must_use]
    pub fn table_data_dir(
        &self,
        fqdn: &NodeFqdn,
        name: &BackupName,
        mode: BackupMode,
        keyspace: &str,
        table: &str,
    ) -> String {
        format!("{}/{keyspace}/{table}", self.data_dir(fqdn, name, mode))
    }

    /// Root of the whole derived index.
    #[must_use]
    pub fn index_root(&self) -> String {
        self.join("index")
    }

    /// Index directory for one backup name.
    #[must_use]
    pub fn backup_index_dir(&self, name: &BackupName) -> String {
        self.join(&format!("index/backup_index/{name}"))
    }

    /// Index copy of a node's tokenmap.
    #[must_use]
    pub fn index_tokenmap(&self, name: &BackupName, fqdn: &NodeFqdn) -> String {
        format!("{}/tokenmap_{fqdn}.json", self.backup_index_dir(name))
    }

    /// Index copy of a node's schema.
    #[must_use]
    pub fn index_schema(&self, name: &BackupName, fqdn: &NodeFqdn) -> String {
        format!("{}/schema_{fqdn}.cql", self.backup_index_dir(name))
    }

    /// Index copy of a node's manifest.
    #[must_use]
    pub fn index_manifest(&self, name: &BackupName, fqdn: &NodeFqdn) -> String {
        format!("{}/manifest_{fqdn}.json", self.backup_index_dir(name))
    }

    /// Zero-byte timestamp marker for a backup event.
    #[must_use]
    pub fn index_timestamp(
        &self,
        event: IndexEvent,
        name: &BackupName,
        fqdn: &NodeFqdn,
        seconds: u64,
    ) -> String {
        format!(
            "{}/{}_{fqdn}_{seconds}.timestamp",
            self.backup_index_dir(name),
            event.as_str()
        )
    }

    /// Latest-backup directory of one node.
    #[must_use]
    pub fn latest_backup_dir(&self, fqdn: &NodeFqdn) -> String {
        self.join(&format!("index/latest_backup/{fqdn}"))
    }

    /// Latest-backup tokenmap pointer of one node.
    #[must_use]
    pub fn latest_backup_tokenmap(&self, fqdn: &NodeFqdn) -> String {
        format!("{}/tokenmap.json", self.latest_backup_dir(fqdn))
    }

    /// Latest-backup name pointer of one node (last-writer-wins).
    #[must_use]
    pub fn latest_backup_name(&self, fqdn: &NodeFqdn) -> String {
        format!("{}/backup_name.txt", self.latest_backup_dir(fqdn))
    }

    /// Split a storage path into `(fqdn, backup name)` when it lies
    /// under a node-backup root; index objects and pool data return
    /// `None`.
    #[must_use]
    pub fn parse_node_backup_path(&self, storage_path: &str) -> Option<(String, String)> {
        let relative = self.manifest_relative(storage_path);
        let mut parts = relative.split('/');
        let fqdn = parts.next()?;
        let name = parts.next()?;
        parts.next()?;
        if fqdn.is_empty() || name.is_empty() || fqdn == "index" || name == "data" {
            return None;
        }
        Some((fqdn.to_owned(), name.to_owned()))
    }
}

/// Parse a timestamp file name (`<event>_<fqdn>_<seconds>.timestamp`).
///
/// The numeric suffix must be seconds since the epoch; millisecond
/// magnitudes are rejected rather than converted.
pub fn parse_timestamp_filename(filename: &str) -> Result<TimestampEntry> {
    let invalid = |detail: &str| {
        ErrorEnvelope::expected(
            ErrorCode::new("domain", "invalid_timestamp_entry"),
            format!("bad timestamp object name {filename}: {detail}"),
        )
    };

    let stem = filename
        .strip_suffix(".timestamp")
        .ok_or_else(|| invalid("missing .timestamp suffix"))?;
    let (event_str, rest) = stem
        .split_once('_')
        .ok_or_else(|| invalid("missing event prefix"))?;
    let event = match event_str {
        "started" => IndexEvent::Started,
        "finished" => IndexEvent::Finished,
        _ => return Err(invalid("unknown event")),
    };
    let (fqdn, seconds_str) = rest
        .rsplit_once('_')
        .ok_or_else(|| invalid("missing timestamp suffix"))?;
    if fqdn.is_empty() {
        return Err(invalid("empty fqdn"));
    }
    let seconds: u64 = seconds_str
        .parse()
        .map_err(|_| invalid("timestamp is not an integer"))?;
    if seconds > MAX_EPOCH_SECONDS {
        return Err(invalid("timestamp is not in seconds"));
    }
    Ok(TimestampEntry {
        event,
        fqdn: fqdn.to_owned(),
        seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (BackupLayout, NodeFqdn, BackupName) {
        (
            BackupLayout::new("clusters/prod"),
            NodeFqdn::parse("n1.example.com").expect("fqdn"),
            BackupName::parse("bk1").expect("name"),
        )
    }

    #[test]
    fn meta_paths_follow_the_layout() {
        let (layout, fqdn, name) = fixtures();
        assert_eq!(
            layout.schema_path(&fqdn, &name),
            "clusters/prod/n1.example.com/bk1/meta/schema.cql"
        );
        assert_eq!(
            layout.manifest_path(&fqdn, &name),
            "clusters/prod/n1.example.com/bk1/meta/manifest.json"
        );
        assert_eq!(
            layout.tokenmap_path(&fqdn, &name),
            "clusters/prod/n1.example.com/bk1/meta/tokenmap.json"
        );
    }

    #[test]
    fn full_and_incremental_data_dirs_differ() {
        let (layout, fqdn, name) = fixtures();
        assert_eq!(
            layout.data_dir(&fqdn, &name, BackupMode::Full),
            "clusters/prod/n1.example.com/bk1/data"
        );
        assert_eq!(
            layout.data_dir(&fqdn, &name, BackupMode::Incremental),
            "clusters/prod/n1.example.com/data"
        );
    }

    #[test]
    fn empty_prefix_produces_bare_paths() {
        let layout = BackupLayout::new("");
        let fqdn = NodeFqdn::parse("n1").expect("fqdn");
        let name = BackupName::parse("bk1").expect("name");
        assert_eq!(layout.schema_path(&fqdn, &name), "n1/bk1/meta/schema.cql");
        assert_eq!(layout.index_root(), "index");
    }

    #[test]
    fn index_entry_paths() {
        let (layout, fqdn, name) = fixtures();
        assert_eq!(
            layout.index_tokenmap(&name, &fqdn),
            "clusters/prod/index/backup_index/bk1/tokenmap_n1.example.com.json"
        );
        assert_eq!(
            layout.index_timestamp(IndexEvent::Started, &name, &fqdn, 1_700_000_000),
            "clusters/prod/index/backup_index/bk1/started_n1.example.com_1700000000.timestamp"
        );
        assert_eq!(
            layout.latest_backup_name(&fqdn),
            "clusters/prod/index/latest_backup/n1.example.com/backup_name.txt"
        );
    }

    #[test]
    fn manifest_relative_strips_the_prefix() {
        let (layout, _, _) = fixtures();
        assert_eq!(
            layout.manifest_relative("clusters/prod/n1/bk1/data/ks/t/f.db"),
            "n1/bk1/data/ks/t/f.db"
        );
        let bare = BackupLayout::new("");
        assert_eq!(
            bare.manifest_relative("n1/bk1/data/ks/t/f.db"),
            "n1/bk1/data/ks/t/f.db"
        );
    }

    #[test]
    fn node_backup_paths_are_recognized() {
        let (layout, _, _) = fixtures();
        assert_eq!(
            layout.parse_node_backup_path("clusters/prod/n1/bk1/meta/schema.cql"),
            Some(("n1".to_owned(), "bk1".to_owned()))
        );
        assert_eq!(
            layout.parse_node_backup_path("clusters/prod/index/backup_index/bk1/schema_n1.cql"),
            None
        );
        assert_eq!(
            layout.parse_node_backup_path("clusters/prod/n1/data/ks/t/f.db"),
            None
        );
    }

    #[test]
    fn timestamp_names_parse_in_seconds_only() {
        let entry = parse_timestamp_filename("started_n1.example.com_1700000000.timestamp")
            .expect("valid entry");
        assert_eq!(entry.event, IndexEvent::Started);
        assert_eq!(entry.fqdn, "n1.example.com");
        assert_eq!(entry.seconds, 1_700_000_000);

        // Millisecond magnitude must be rejected, not divided.
        assert!(parse_timestamp_filename("finished_n1_1700000000000.timestamp").is_err());
        assert!(parse_timestamp_filename("finished_n1.timestamp").is_err());
        assert!(parse_timestamp_filename("paused_n1_1700000000.timestamp").is_err());
    }
}
