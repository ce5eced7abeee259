//! Index maintenance: per-backup entries and the latest pointers.
//!
//! The index is a derived view; every entry can be rebuilt from the
//! authoritative meta objects under `<fqdn>/<name>/meta/`.

use super::Catalog;
use ringvault_domain::{BackupName, IndexEvent, NodeFqdn};
use ringvault_shared::{RequestContext, Result};

/// Outcome of an index rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildIndexReport {
    /// `(fqdn, name)` pairs indexed (or that would be, with `--noop`).
    pub indexed: Vec<(String, String)>,
    /// Latest finished backup chosen per node.
    pub latest: Vec<(String, String)>,
}

impl Catalog {
    /// Record a backup start: tokenmap + schema copies and the started
    /// timestamp.
    pub async fn record_backup_start(
        &self,
        ctx: &RequestContext,
        fqdn: &NodeFqdn,
        name: &BackupName,
        tokenmap_json: &str,
        schema: &str,
        started_ms: u64,
    ) -> Result<()> {
        self.storage()
            .upload_from_string(
                ctx,
                self.layout().index_tokenmap(name, fqdn),
                tokenmap_json.to_owned(),
            )
            .await?;
        self.storage()
            .upload_from_string(ctx, self.layout().index_schema(name, fqdn), schema.to_owned())
            .await?;
        self.storage()
            .upload_from_string(
                ctx,
                self.layout()
                    .index_timestamp(IndexEvent::Started, name, fqdn, started_ms / 1_000),
                String::new(),
            )
            .await?;
        Ok(())
    }

    /// Record a backup finish: manifest copy, finished timestamp, and
    /// the last-writer-wins latest pointers.
    pub async fn record_backup_finish(
        &self,
        ctx: &RequestContext,
        fqdn: &NodeFqdn,
        name: &BackupName,
        manifest_json: &str,
        tokenmap_json: &str,
        finished_ms: u64,
    ) -> Result<()> {
        self.storage()
            .upload_from_string(
                ctx,
                self.layout().index_manifest(name, fqdn),
                manifest_json.to_owned(),
            )
            .await?;
        self.storage()
            .upload_from_string(
                ctx,
                self.layout()
                    .index_timestamp(IndexEvent::Finished, name, fqdn, finished_ms / 1_000),
                String::new(),
            )
            .await?;
        self.storage()
            .upload_from_string(
                ctx,
                self.layout().latest_backup_tokenmap(fqdn),
                tokenmap_json.to_owned(),
            )
            .await?;
        self.storage()
            .upload_from_string(
                ctx,
                self.layout().latest_backup_name(fqdn),
                name.as_str().to_owned(),
            )
            .await?;
        Ok(())
    }

    /// Delete every index entry referencing one node backup.
    pub async fn delete_index_entries(
        &self,
        ctx: &RequestContext,
        fqdn: &NodeFqdn,
        name: &BackupName,
    ) -> Result<usize> {
        let prefix = self.layout().backup_index_dir(name);
        let objects = self.storage().list(ctx, format!("{prefix}/")).await?;
        let mut deleted = 0usize;
        for object in objects {
            let relative = self.layout_relative(&object.name);
            let Some(file) = relative.rsplit('/').next() else {
                continue;
            };
            let marker_json = format!("_{}.json", fqdn);
            let marker_cql = format!("_{}.cql", fqdn);
            let marker_ts = format!("_{}_", fqdn);
            if file.ends_with(&marker_json)
                || file.ends_with(&marker_cql)
                || file.contains(&marker_ts)
            {
                self.storage()
                    .delete(ctx, format!("{prefix}/{file}"))
                    .await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Rebuild the whole index from the authoritative meta objects.
    ///
    /// With `noop` the report is computed but nothing is written.
    pub async fn build_index(&self, ctx: &RequestContext, noop: bool) -> Result<BuildIndexReport> {
        let records = self.discover_node_backups(ctx).await?;
        let mut report = BuildIndexReport::default();
        let mut latest: std::collections::BTreeMap<String, (u64, BackupName, String)> =
            std::collections::BTreeMap::new();

        for record in &records {
            report
                .indexed
                .push((record.fqdn.to_string(), record.name.to_string()));

            let backup = self.node_backup(&record.fqdn, &record.name);
            let tokenmap_json = self
                .storage()
                .get_as_string(ctx, backup.tokenmap_path())
                .await?;
            let schema = self.storage().get_as_string(ctx, backup.schema_path()).await?;

            if !noop {
                self.record_backup_start(
                    ctx,
                    &record.fqdn,
                    &record.name,
                    &tokenmap_json,
                    &schema,
                    record.started_ms.unwrap_or_default(),
                )
                .await?;
            }

            if let Some(finished_ms) = record.finished_ms {
                let manifest_json = self
                    .storage()
                    .get_as_string(ctx, backup.manifest_path())
                    .await?;
                if !noop {
                    self.storage()
                        .upload_from_string(
                            ctx,
                            self.layout().index_manifest(&record.name, &record.fqdn),
                            manifest_json,
                        )
                        .await?;
                    self.storage()
                        .upload_from_string(
                            ctx,
                            self.layout().index_timestamp(
                                IndexEvent::Finished,
                                &record.name,
                                &record.fqdn,
                                finished_ms / 1_000,
                            ),
                            String::new(),
                        )
                        .await?;
                }

                let fqdn_key = record.fqdn.to_string();
                let is_newer = latest
                    .get(&fqdn_key)
                    .map_or(true, |(best, _, _)| finished_ms >= *best);
                if is_newer {
                    latest.insert(fqdn_key, (finished_ms, record.name.clone(), tokenmap_json));
                }
            }
        }

        for (fqdn, (_, name, tokenmap_json)) in latest {
            report.latest.push((fqdn.clone(), name.to_string()));
            if noop {
                continue;
            }
            let fqdn = NodeFqdn::parse(&fqdn).map_err(ringvault_shared::ErrorEnvelope::from)?;
            self.storage()
                .upload_from_string(
                    ctx,
                    self.layout().latest_backup_tokenmap(&fqdn),
                    tokenmap_json,
                )
                .await?;
            self.storage()
                .upload_from_string(
                    ctx,
                    self.layout().latest_backup_name(&fqdn),
                    name.as_str().to_owned(),
                )
                .await?;
        }

        Ok(report)
    }
}
