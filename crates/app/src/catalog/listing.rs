//! Index-backed and authoritative backup listings.

use super::cluster::{ClusterBackup, ClusterMember};
use super::Catalog;
use ringvault_domain::{
    parse_timestamp_filename, BackupName, IndexEvent, NodeFqdn, TokenMap,
};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;

/// A node backup as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBackupRecord {
    /// Member node.
    pub fqdn: NodeFqdn,
    /// Backup name.
    pub name: BackupName,
    /// Start time, when recorded.
    pub started_ms: Option<u64>,
    /// Finish time; `None` means incomplete.
    pub finished_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct MemberEntries {
    has_tokenmap: bool,
    has_schema: bool,
    has_manifest: bool,
    started_ms: Option<u64>,
    finished_ms: Option<u64>,
}

#[derive(Debug)]
enum IndexEntry {
    Tokenmap(String),
    Schema(String),
    Manifest(String),
    Timestamp(IndexEvent, String, u64),
}

fn parse_index_entry(file: &str) -> Option<IndexEntry> {
    if file.ends_with(".timestamp") {
        let entry = parse_timestamp_filename(file).ok()?;
        return Some(IndexEntry::Timestamp(entry.event, entry.fqdn, entry.seconds));
    }
    if let Some(fqdn) = file
        .strip_prefix("tokenmap_")
        .and_then(|rest| rest.strip_suffix(".json"))
    {
        return Some(IndexEntry::Tokenmap(fqdn.to_owned()));
    }
    if let Some(fqdn) = file
        .strip_prefix("schema_")
        .and_then(|rest| rest.strip_suffix(".cql"))
    {
        return Some(IndexEntry::Schema(fqdn.to_owned()));
    }
    if let Some(fqdn) = file
        .strip_prefix("manifest_")
        .and_then(|rest| rest.strip_suffix(".json"))
    {
        return Some(IndexEntry::Manifest(fqdn.to_owned()));
    }
    None
}

impl Catalog {
    async fn index_members(
        &self,
        ctx: &RequestContext,
    ) -> Result<BTreeMap<String, BTreeMap<String, MemberEntries>>> {
        let prefix = self.layout().join("index/backup_index/");
        let objects = self.storage().list(ctx, prefix).await?;

        let mut backups: BTreeMap<String, BTreeMap<String, MemberEntries>> = BTreeMap::new();
        for object in objects {
            let relative = self.layout_relative(&object.name);
            let mut parts = relative.split('/');
            if parts.next() != Some("index") || parts.next() != Some("backup_index") {
                continue;
            }
            let Some(name) = parts.next() else { continue };
            let Some(file) = parts.next() else { continue };
            let Some(entry) = parse_index_entry(file) else {
                continue;
            };
            let members = backups.entry(name.to_owned()).or_default();
            match entry {
                IndexEntry::Tokenmap(fqdn) => {
                    members.entry(fqdn).or_default().has_tokenmap = true;
                },
                IndexEntry::Schema(fqdn) => {
                    members.entry(fqdn).or_default().has_schema = true;
                },
                IndexEntry::Manifest(fqdn) => {
                    members.entry(fqdn).or_default().has_manifest = true;
                },
                IndexEntry::Timestamp(IndexEvent::Started, fqdn, seconds) => {
                    members.entry(fqdn).or_default().started_ms = Some(seconds * 1_000);
                },
                IndexEntry::Timestamp(IndexEvent::Finished, fqdn, seconds) => {
                    members.entry(fqdn).or_default().finished_ms = Some(seconds * 1_000);
                },
            }
        }
        Ok(backups)
    }

    /// List node backups known to the index, optionally for one node.
    pub async fn list_node_backups(
        &self,
        ctx: &RequestContext,
        fqdn: Option<&NodeFqdn>,
    ) -> Result<Vec<NodeBackupRecord>> {
        let backups = self.index_members(ctx).await?;
        let mut records = Vec::new();
        for (name, members) in backups {
            let Ok(name) = BackupName::parse(&name) else {
                continue;
            };
            for (member_fqdn, entries) in members {
                if let Some(filter) = fqdn {
                    if filter.as_str() != member_fqdn {
                        continue;
                    }
                }
                let Ok(member_fqdn) = NodeFqdn::parse(&member_fqdn) else {
                    continue;
                };
                let finished_ms = entries
                    .finished_ms
                    .or(if entries.has_manifest { Some(0) } else { None });
                records.push(NodeBackupRecord {
                    fqdn: member_fqdn,
                    name: name.clone(),
                    started_ms: entries.started_ms,
                    finished_ms,
                });
            }
        }
        Ok(records)
    }

    /// The most recent finished backup of one node.
    ///
    /// Reads the last-writer-wins pointer first, falling back to a
    /// listing scan when the pointer is gone.
    pub async fn latest_node_backup(
        &self,
        ctx: &RequestContext,
        fqdn: &NodeFqdn,
    ) -> Result<Option<NodeBackupRecord>> {
        let pointer = self.layout().latest_backup_name(fqdn);
        match self.storage().get_as_string(ctx, pointer).await {
            Ok(raw) => {
                if let Ok(name) = BackupName::parse(raw.trim()) {
                    let records = self.list_node_backups(ctx, Some(fqdn)).await?;
                    if let Some(record) = records.into_iter().find(|record| record.name == name) {
                        return Ok(Some(record));
                    }
                }
            },
            Err(error) if error.is_not_found() => {},
            Err(error) => return Err(error),
        }

        let mut finished: Vec<NodeBackupRecord> = self
            .list_node_backups(ctx, Some(fqdn))
            .await?
            .into_iter()
            .filter(|record| record.finished_ms.is_some())
            .collect();
        finished.sort_by_key(|record| record.started_ms);
        Ok(finished.pop())
    }

    async fn cluster_tokenmap(
        &self,
        ctx: &RequestContext,
        name: &BackupName,
        members: &[String],
    ) -> Result<TokenMap> {
        for member in members {
            let Ok(fqdn) = NodeFqdn::parse(member) else {
                continue;
            };
            let from_index = self.layout().index_tokenmap(name, &fqdn);
            if let Ok(raw) = self.storage().get_as_string(ctx, from_index).await {
                if let Ok(map) = TokenMap::from_json(&raw) {
                    return Ok(map);
                }
            }
            let from_meta = self.layout().tokenmap_path(&fqdn, name);
            if let Ok(raw) = self.storage().get_as_string(ctx, from_meta).await {
                if let Ok(map) = TokenMap::from_json(&raw) {
                    return Ok(map);
                }
            }
        }
        Err(ErrorEnvelope::expected(
            ErrorCode::not_found(),
            format!("no tokenmap found for backup {name}"),
        ))
    }

    /// Group one backup name into a cluster backup.
    pub async fn get_cluster_backup(
        &self,
        ctx: &RequestContext,
        name: &BackupName,
    ) -> Result<ClusterBackup> {
        let mut backups = self.index_members(ctx).await?;
        let members = backups.remove(name.as_str()).ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::not_found(),
                format!("no such backup: {name}"),
            )
        })?;

        let member_names: Vec<String> = members.keys().cloned().collect();
        let tokenmap = self.cluster_tokenmap(ctx, name, &member_names).await?;
        let members = members
            .into_iter()
            .map(|(fqdn, entries)| ClusterMember {
                fqdn,
                started_ms: entries.started_ms,
                finished_ms: entries
                    .finished_ms
                    .or(if entries.has_manifest { Some(0) } else { None }),
            })
            .collect();
        Ok(ClusterBackup {
            name: name.clone(),
            members,
            tokenmap,
        })
    }

    /// All cluster backups, ordered by earliest start.
    pub async fn list_cluster_backups(&self, ctx: &RequestContext) -> Result<Vec<ClusterBackup>> {
        let backups = self.index_members(ctx).await?;
        let mut out = Vec::new();
        for name in backups.keys() {
            let Ok(name) = BackupName::parse(name) else {
                continue;
            };
            match self.get_cluster_backup(ctx, &name).await {
                Ok(cluster) => out.push(cluster),
                Err(error) if error.is_not_found() => {},
                Err(error) => return Err(error),
            }
        }
        out.sort_by_key(ClusterBackup::started_ms);
        Ok(out)
    }

    /// The most recent cluster backup where every ring node finished.
    pub async fn latest_complete_cluster_backup(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<ClusterBackup>> {
        let mut complete: Vec<ClusterBackup> = self
            .list_cluster_backups(ctx)
            .await?
            .into_iter()
            .filter(ClusterBackup::is_complete)
            .collect();
        complete.sort_by_key(ClusterBackup::finished_ms);
        Ok(complete.pop())
    }

    /// Authoritative scan of the meta objects, ignoring the index.
    ///
    /// A backup exists once its schema object does; its finish time is
    /// the manifest object's creation time.
    pub async fn discover_node_backups(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<NodeBackupRecord>> {
        let prefix = self.layout().join("");
        let objects = self.storage().list(ctx, prefix).await?;

        #[derive(Default)]
        struct MetaTimes {
            schema_ms: Option<Option<u64>>,
            manifest_ms: Option<Option<u64>>,
        }

        let mut found: BTreeMap<(String, String), MetaTimes> = BTreeMap::new();
        for object in objects {
            let relative = self.layout_relative(&object.name);
            let Some((fqdn, name)) = self.layout().parse_node_backup_path(&relative) else {
                continue;
            };
            let entry = found.entry((fqdn, name)).or_default();
            if relative.ends_with("/meta/schema.cql") {
                entry.schema_ms = Some(object.time_ms());
            } else if relative.ends_with("/meta/manifest.json") {
                entry.manifest_ms = Some(object.time_ms());
            }
        }

        let mut records = Vec::new();
        for ((fqdn, name), times) in found {
            let Some(schema_ms) = times.schema_ms else {
                continue;
            };
            let (Ok(fqdn), Ok(name)) = (NodeFqdn::parse(&fqdn), BackupName::parse(&name)) else {
                continue;
            };
            records.push(NodeBackupRecord {
                fqdn,
                name,
                started_ms: schema_ms,
                finished_ms: times.manifest_ms.flatten(),
            });
        }
        Ok(records)
    }
}
