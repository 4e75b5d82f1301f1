//! Storage layer
//!
//! Two capabilities back the app: a synchronous [`KeyValueStore`] holding the
//! legacy flat representation, and an asynchronous, versioned
//! [`DocumentStore`] that becomes canonical once migration completes. Each has
//! a memory and a file backend, created through [`StorageFactory`].

pub mod backends;
pub mod config;
pub mod error;
pub mod factory;
pub mod handles;
pub mod schema;
pub mod traits;


pub use config::{BackendType, DatabaseConfig, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use factory::StorageFactory;
pub use handles::{DirectoryHandle, DirectoryHandles};
pub use traits::{DocumentStore, KeyValueStore, SchemaUpgrade, UpgradeFn};

use serde::Serialize;
use std::fmt;

/// Which backend currently holds the canonical prompt data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Migrated: prompts, categories and settings live in the document store
    Document,
    /// Legacy or degraded: everything lives in the key-value store
    KeyValueOnly,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Document => write!(f, "document"),
            StorageMode::KeyValueOnly => write!(f, "key-value only"),
        }
    }
}
