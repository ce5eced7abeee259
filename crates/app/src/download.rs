//! Download a node backup into a local directory.

use crate::catalog::Catalog;
use ringvault_domain::{BackupName, NodeFqdn};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::Path;

/// Download every object of a node backup plus its meta files.
///
/// Data lands under `<destination>/<keyspace>/<table>/`; the three
/// meta files land in `destination` itself.
pub async fn download_backup(
    ctx: &RequestContext,
    catalog: &Catalog,
    fqdn: &NodeFqdn,
    name: &BackupName,
    destination: &Path,
) -> Result<()> {
    let backup = catalog.node_backup(fqdn, name);
    if !backup.exists(ctx).await? {
        return Err(ErrorEnvelope::expected(
            ErrorCode::not_found(),
            format!("no such backup: {name} on {fqdn}"),
        ));
    }

    let manifest = backup.manifest(ctx).await?;
    for section in manifest.sections() {
        let table_dir = destination.join(&section.keyspace).join(&section.columnfamily);
        let srcs: Vec<String> = section
            .objects
            .iter()
            .map(|object| catalog.layout().join(&object.path))
            .collect();
        tokio::fs::create_dir_all(&table_dir)
            .await
            .map_err(ErrorEnvelope::from)?;
        if !srcs.is_empty() {
            catalog
                .storage()
                .download_many(ctx, srcs, table_dir)
                .await?;
        }
    }

    catalog
        .storage()
        .download_many(
            ctx,
            vec![
                backup.manifest_path(),
                backup.schema_path(),
                backup.tokenmap_path(),
            ],
            destination.to_path_buf(),
        )
        .await
}
