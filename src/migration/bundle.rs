//! Portable export format

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::status::MigrationStatus;
use crate::model::Prompt;

/// Full snapshot of the library as written by `export`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    /// Epoch milliseconds
    pub exported_at: i64,
    pub prompts: Vec<Prompt>,
    pub categories: Vec<String>,
    /// Setting values as text; structured settings are JSON encoded
    pub settings: BTreeMap<String, String>,
    pub migration_status: MigrationStatus,
}

/// Bundle form of a stored setting value
pub(crate) fn setting_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl ExportBundle {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
