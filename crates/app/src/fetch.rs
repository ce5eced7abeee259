//! Fetch the tokenmap a backup was taken with.

use crate::catalog::Catalog;
use ringvault_domain::{BackupName, TokenMap};
use ringvault_shared::{RequestContext, Result};

/// Load the cluster tokenmap recorded with a backup.
pub async fn fetch_tokenmap(
    ctx: &RequestContext,
    catalog: &Catalog,
    name: &BackupName,
) -> Result<TokenMap> {
    let cluster = catalog.get_cluster_backup(ctx, name).await?;
    Ok(cluster.tokenmap)
}
