//! Storage driver selection from config.

use ringvault_adapters::{GcsStorage, LocalStorage};
use ringvault_config::{StorageProvider, ValidatedConfig};
use ringvault_ports::StoragePort;
use ringvault_shared::Result;
use std::path::Path;
use std::sync::Arc;

/// Build the storage driver named by the config.
pub async fn build_storage(config: &ValidatedConfig) -> Result<Arc<dyn StoragePort>> {
    match config.provider() {
        StorageProvider::Local => {
            let driver = LocalStorage::new(
                Path::new(&config.storage.base_path),
                &config.storage.bucket_name,
            )?;
            Ok(Arc::new(driver))
        },
        StorageProvider::Gcs => {
            let key_file = if config.storage.key_file.is_empty() {
                None
            } else {
                Some(Path::new(&config.storage.key_file))
            };
            let driver = GcsStorage::new(&config.storage.bucket_name, key_file).await?;
            Ok(Arc::new(driver))
        },
    }
}
