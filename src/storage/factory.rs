//! Storage factory for creating store instances

use std::sync::Arc;
use tracing::debug;

use super::backends::{FileDocumentStore, FileKeyValueStore, MemoryDocumentStore, MemoryKeyValueStore};
use super::config::{BackendType, StorageConfig};
use super::error::StorageResult;
use super::schema::upgrade_app_schema;
use super::traits::{DocumentStore, KeyValueStore, UpgradeFn};

/// Factory for creating storage instances
pub struct StorageFactory;

impl StorageFactory {
    /// Create the key-value store described by `config`
    pub fn key_value_store(config: &StorageConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
        match config.backend {
            BackendType::File => {
                let store = FileKeyValueStore::new(&config.base_dir, config.kv_quota_bytes)?;
                Ok(Arc::new(store))
            }
            BackendType::Memory => Ok(Arc::new(MemoryKeyValueStore::new(config.kv_quota_bytes))),
        }
    }

    /// Open the app document database with its standard schema upgrade
    pub async fn open_document_store(
        config: &StorageConfig,
    ) -> StorageResult<Arc<dyn DocumentStore>> {
        Self::open_document_store_with(config, &upgrade_app_schema).await
    }

    /// Open the document database described by `config` with a custom upgrade
    pub async fn open_document_store_with(
        config: &StorageConfig,
        upgrade: &UpgradeFn,
    ) -> StorageResult<Arc<dyn DocumentStore>> {
        let db = &config.database;
        debug!("Opening document database {} v{}", db.name, db.version);
        match config.backend {
            BackendType::File => {
                let store =
                    FileDocumentStore::open(&config.base_dir, &db.name, db.version, upgrade)
                        .await?;
                Ok(Arc::new(store))
            }
            BackendType::Memory => {
                let store = MemoryDocumentStore::open(&db.name, db.version, upgrade)?;
                Ok(Arc::new(store))
            }
        }
    }
}
