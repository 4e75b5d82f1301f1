//! In-memory storage backends for testing and ephemeral sessions

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock as StdRwLock;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::*,
};

/// In-memory key-value store with a byte quota
pub struct MemoryKeyValueStore {
    quota: u64,
    entries: StdRwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Create a new store holding at most `quota` bytes of keys plus values
    pub fn new(quota: u64) -> Self {
        Self {
            quota,
            entries: StdRwLock::new(HashMap::new()),
        }
    }

    /// Bytes currently used
    pub fn usage(&self) -> u64 {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(k, v)| entry_size(k, v)).sum())
            .unwrap_or(0)
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new(5 * 1024 * 1024)
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.read().map_err(StorageError::lock)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().map_err(StorageError::lock)?;
        let others: u64 = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        let needed = others + entry_size(key, value);
        if needed > self.quota {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota: self.quota,
            });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries
            .write()
            .map_err(StorageError::lock)?
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = self.entries.read().map_err(StorageError::lock)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory document database
pub struct MemoryDocumentStore {
    name: String,
    version: u32,
    store_names: Vec<String>,
    stores: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    /// Open a fresh database, running the upgrade from version 0
    pub fn open(name: &str, version: u32, upgrade: &UpgradeFn) -> StorageResult<Self> {
        if version == 0 {
            return Err(StorageError::configuration(
                "document database version must be at least 1",
            ));
        }

        let mut names = BTreeSet::new();
        let mut schema = SchemaUpgrade::new(0, version, &mut names);
        upgrade(&mut schema);

        Ok(Self {
            name: name.to_string(),
            version,
            store_names: names.iter().cloned().collect(),
            stores: RwLock::new(names.into_iter().map(|n| (n, BTreeMap::new())).collect()),
        })
    }
}

fn missing_store(store: &str) -> StorageError {
    StorageError::not_found(format!("object store '{store}'"))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.store_names.clone()
    }

    async fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>> {
        let stores = self.stores.read().await;
        let docs = stores.get(store).ok_or_else(|| missing_store(store))?;
        Ok(docs.get(key).cloned())
    }

    async fn put(&self, store: &str, key: &str, value: Value) -> StorageResult<()> {
        let mut stores = self.stores.write().await;
        let docs = stores.get_mut(store).ok_or_else(|| missing_store(store))?;
        docs.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> StorageResult<()> {
        let mut stores = self.stores.write().await;
        let docs = stores.get_mut(store).ok_or_else(|| missing_store(store))?;
        docs.remove(key);
        Ok(())
    }

    async fn get_all(&self, store: &str) -> StorageResult<Vec<(String, Value)>> {
        let stores = self.stores.read().await;
        let docs = stores.get(store).ok_or_else(|| missing_store(store))?;
        Ok(docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn count(&self, store: &str) -> StorageResult<usize> {
        let stores = self.stores.read().await;
        let docs = stores.get(store).ok_or_else(|| missing_store(store))?;
        Ok(docs.len())
    }

    async fn clear(&self, store: &str) -> StorageResult<()> {
        let mut stores = self.stores.write().await;
        let docs = stores.get_mut(store).ok_or_else(|| missing_store(store))?;
        docs.clear();
        Ok(())
    }
}
