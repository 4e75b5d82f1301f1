//! Durable migration gate and per-run reports

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Format version written into migration status and export bundles
pub const DATA_FORMAT_VERSION: &str = "2.0.0";

/// Persisted outcome of the key-value to document store migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub is_completed: bool,
    pub version: String,
    pub migrated_items: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_migration_at: Option<i64>,
}

impl Default for MigrationStatus {
    fn default() -> Self {
        Self {
            is_completed: false,
            version: DATA_FORMAT_VERSION.to_string(),
            migrated_items: 0,
            errors: Vec::new(),
            last_migration_at: None,
        }
    }
}

/// Report of one migration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    /// True when every validated record was written and verified
    pub success: bool,
    pub migrated_items: usize,
    pub errors: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Report of one import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub imported_items: usize,
    pub errors: Vec<String>,
}
