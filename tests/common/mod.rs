//! Common test utilities and helpers
#![allow(dead_code)]

use anyhow::Result;
use prompt_vault::storage::schema::PROMPTS_KEY;
use prompt_vault::storage::{StorageConfig, StorageFactory};
use prompt_vault::{App, AppConfig};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

/// A file-backed vault in a temporary directory
pub struct TestVault {
    temp_dir: TempDir,
}

impl TestVault {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config(&self) -> AppConfig {
        AppConfig {
            storage: StorageConfig::file(self.path()),
            ..AppConfig::default()
        }
    }

    /// Write a legacy key-value value as an older build would have
    pub fn seed_legacy(&self, key: &str, value: &Value) -> Result<()> {
        let kv = StorageFactory::key_value_store(&self.config().storage)?;
        kv.set(key, &value.to_string())?;
        Ok(())
    }

    pub fn seed_legacy_prompts(&self, count: usize) -> Result<()> {
        self.seed_legacy(PROMPTS_KEY, &legacy_prompts(count))
    }

    pub async fn open(&self) -> Result<App> {
        App::bootstrap(self.config()).await
    }
}

/// Prompts in the flat legacy format
pub fn legacy_prompts(count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                json!({
                    "id": format!("legacy-{i}"),
                    "title": format!("Legacy prompt {i}"),
                    "content": format!("Do task {i} with {{{{input}}}}"),
                    "category": if i % 2 == 0 { "Writing" } else { "Coding" },
                    "tags": ["imported", format!("batch-{}", i / 3)],
                    "createdAt": 1_700_000_000_000i64 + i as i64 * 1000,
                    "updatedAt": 1_700_000_000_000i64 + i as i64 * 1000,
                    "isFavorite": i == 0,
                })
            })
            .collect(),
    )
}
