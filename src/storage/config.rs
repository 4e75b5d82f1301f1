//! Storage configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// File-based storage (default)
    File,
    /// Memory storage (for testing)
    Memory,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::File
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Main storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: BackendType,

    /// Base directory for file storage
    #[serde(default = "default_base_dir", alias = "data_dir")]
    pub base_dir: PathBuf,

    /// Capacity of the key-value namespace in bytes (keys plus values)
    #[serde(default = "default_kv_quota")]
    pub kv_quota_bytes: u64,

    /// Document database identity
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            base_dir: default_base_dir(),
            kv_quota_bytes: default_kv_quota(),
            database: DatabaseConfig::default(),
        }
    }
}

impl StorageConfig {
    /// In-memory configuration, used by tests and ephemeral sessions
    pub fn memory() -> Self {
        Self {
            backend: BackendType::Memory,
            ..Default::default()
        }
    }

    /// File configuration rooted at `base_dir`
    pub fn file(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendType::File,
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }
}

/// Name and schema version of the document database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_name")]
    pub name: String,

    #[serde(default = "default_database_version")]
    pub version: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_database_name(),
            version: default_database_version(),
        }
    }
}

// Default value functions for serde
fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".prompt-vault"))
        .unwrap_or_else(|| PathBuf::from(".prompt-vault"))
}

fn default_kv_quota() -> u64 {
    5 * 1024 * 1024 // 5MB, the usual per-origin local storage budget
}

fn default_database_name() -> String {
    super::schema::DATABASE_NAME.to_string()
}

fn default_database_version() -> u32 {
    super::schema::DATABASE_VERSION
}
