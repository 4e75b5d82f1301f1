//! Core trait definitions for the storage layer

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

use super::error::StorageResult;

/// Synchronous flat key-value storage.
///
/// Last write wins; there are no transactions. Implementations enforce a
/// capacity limit and reject writes that would exceed it.
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// List all keys currently stored
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Asynchronous, versioned object database.
///
/// Values are JSON documents grouped in named object stores. Object stores
/// only exist once a schema upgrade created them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Database name
    fn name(&self) -> &str;

    /// Schema version the database was opened with
    fn version(&self) -> u32;

    /// Names of the object stores in the schema
    fn store_names(&self) -> Vec<String>;

    /// Read a document
    async fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Insert or replace a document
    async fn put(&self, store: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Delete a document; deleting a missing key is not an error
    async fn delete(&self, store: &str, key: &str) -> StorageResult<()>;

    /// All documents of a store, ordered by key
    async fn get_all(&self, store: &str) -> StorageResult<Vec<(String, Value)>>;

    /// Number of documents in a store
    async fn count(&self, store: &str) -> StorageResult<usize>;

    /// Remove every document of a store
    async fn clear(&self, store: &str) -> StorageResult<()>;
}

/// Schema changes requested while opening a database at a newer version
pub struct SchemaUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    stores: &'a mut BTreeSet<String>,
}

impl<'a> SchemaUpgrade<'a> {
    pub fn new(old_version: u32, new_version: u32, stores: &'a mut BTreeSet<String>) -> Self {
        Self {
            old_version,
            new_version,
            stores,
        }
    }

    /// Version persisted before this open, 0 for a new database
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    /// Create an object store; creating an existing one is a no-op
    pub fn create_object_store(&mut self, name: &str) {
        self.stores.insert(name.to_string());
    }

    /// Drop an object store and its documents
    pub fn delete_object_store(&mut self, name: &str) {
        self.stores.remove(name);
    }

    pub fn has_object_store(&self, name: &str) -> bool {
        self.stores.contains(name)
    }
}

/// Callback run when a database is opened at a version above the persisted one
pub type UpgradeFn = dyn Fn(&mut SchemaUpgrade<'_>) + Send + Sync;
