//! One-shot migration of legacy key-value data into the document store,
//! plus export, import and factory reset of the whole library.
//!
//! The migration is gated by a status record in the key-value store. It runs
//! until one attempt writes and verifies every valid record; after that it is
//! a no-op. Writes are upserts by id, so a retried attempt never duplicates.
//! Legacy keys are left in place.

mod bundle;
mod status;

#[cfg(test)]
mod tests;

pub use bundle::ExportBundle;
pub use status::{ImportResult, MigrationResult, MigrationStatus, DATA_FORMAT_VERSION};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use bundle::setting_text;
use crate::model::{merge_categories, now_millis, sanitize_prompt, Prompt, Theme};
use crate::model::sanitize::json_type;
use crate::repository::{PromptRepository, RepositoryResult};
use crate::storage::schema::{
    is_app_key, APP_STORES, CATEGORIES_KEY, CATEGORIES_STORE, CATEGORY_LIST_KEY, FILTERS_KEY,
    FILTERS_SETTING, LEGACY_KEYS, MIGRATION_STATUS_KEY, PROMPTS_KEY, PROMPTS_STORE,
    SETTINGS_STORE, SETTING_KEY_PREFIX, THEME_KEY, THEME_SETTING,
};
use crate::storage::{DocumentStore, KeyValueStore, StorageMode, StorageResult};

pub struct MigrationEngine {
    kv: Arc<dyn KeyValueStore>,
    documents: Option<Arc<dyn DocumentStore>>,
}

/// Accumulates the outcome of one migration attempt
#[derive(Default)]
struct Attempt {
    migrated: usize,
    /// Records dropped during validation; reported but not blocking
    rejected: Vec<String>,
    /// Write or verification failures; the attempt stays incomplete
    fatal: Vec<String>,
}

impl MigrationEngine {
    pub fn new(kv: Arc<dyn KeyValueStore>, documents: Option<Arc<dyn DocumentStore>>) -> Self {
        Self { kv, documents }
    }

    /// Persisted status, or the default when missing or unreadable
    pub fn get_migration_status(&self) -> MigrationStatus {
        let raw = match self.kv.get(MIGRATION_STATUS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return MigrationStatus::default(),
            Err(err) => {
                warn!("Failed to read migration status: {}", err);
                return MigrationStatus::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("Migration status is corrupt, treating as not migrated: {}", err);
            MigrationStatus::default()
        })
    }

    fn save_status(&self, status: &MigrationStatus) -> StorageResult<()> {
        self.kv
            .set(MIGRATION_STATUS_KEY, &serde_json::to_string(status)?)
    }

    /// Where canonical prompt data lives given the current status
    pub fn storage_mode(&self) -> StorageMode {
        if self.documents.is_some() && self.get_migration_status().is_completed {
            StorageMode::Document
        } else {
            StorageMode::KeyValueOnly
        }
    }

    /// Whether any legacy key holds data
    pub fn has_legacy_data(&self) -> bool {
        LEGACY_KEYS.iter().any(|key| match self.kv.get(key) {
            Ok(value) => value.is_some(),
            Err(err) => {
                warn!("Failed to read legacy key {}: {}", key, err);
                false
            }
        })
    }

    /// Bring storage up to date at startup and return the resulting status
    pub async fn initialize_storage_migration(&self) -> MigrationStatus {
        let status = self.get_migration_status();
        if status.is_completed {
            debug!("Storage migration already completed");
            return status;
        }
        if self.documents.is_none() {
            warn!("Document store unavailable, running on key-value storage only");
            return status;
        }

        if !self.has_legacy_data() {
            let status = MigrationStatus {
                is_completed: true,
                migrated_items: 0,
                last_migration_at: Some(now_millis()),
                ..MigrationStatus::default()
            };
            if let Err(err) = self.save_status(&status) {
                warn!("Failed to persist migration status: {}", err);
            }
            info!("No legacy data found, storage initialized");
            return status;
        }

        let result = self.migrate_all_data_to_idb().await;
        if !result.success {
            warn!(
                "Storage migration incomplete, will retry on next start: {} errors",
                result.errors.len()
            );
        }
        self.get_migration_status()
    }

    /// Copy legacy prompts, categories and settings into the document store
    pub async fn migrate_all_data_to_idb(&self) -> MigrationResult {
        let started = Instant::now();
        if self.get_migration_status().is_completed {
            return MigrationResult {
                success: true,
                migrated_items: 0,
                errors: Vec::new(),
                duration: started.elapsed(),
            };
        }
        let Some(docs) = self.documents.as_ref() else {
            return MigrationResult {
                success: false,
                migrated_items: 0,
                errors: vec!["document store unavailable".to_string()],
                duration: started.elapsed(),
            };
        };

        info!("Migrating legacy data to the document store");
        let mut attempt = Attempt::default();
        let written = self.migrate_prompts(docs.as_ref(), &mut attempt).await;
        self.migrate_categories(docs.as_ref(), &mut attempt).await;
        self.migrate_settings(docs.as_ref(), &mut attempt).await;

        for id in &written {
            match docs.get(PROMPTS_STORE, id).await {
                Ok(Some(_)) => {}
                Ok(None) => attempt
                    .fatal
                    .push(format!("verification failed: prompt {id} missing after write")),
                Err(err) => attempt
                    .fatal
                    .push(format!("verification failed for prompt {id}: {err}")),
            }
        }

        let completed = attempt.fatal.is_empty();
        let mut errors = attempt.rejected;
        errors.extend(attempt.fatal);
        let status = MigrationStatus {
            is_completed: completed,
            version: DATA_FORMAT_VERSION.to_string(),
            migrated_items: attempt.migrated,
            errors: errors.clone(),
            last_migration_at: Some(now_millis()),
        };
        let mut success = completed;
        if let Err(err) = self.save_status(&status) {
            warn!("Failed to persist migration status: {}", err);
            errors.push(format!("status: {err}"));
            success = false;
        }

        info!(
            "Migration {}: {} prompts written, {} errors",
            if completed { "completed" } else { "incomplete" },
            attempt.migrated,
            errors.len()
        );
        MigrationResult {
            success,
            migrated_items: attempt.migrated,
            errors,
            duration: started.elapsed(),
        }
    }

    /// Returns the ids written
    async fn migrate_prompts(&self, docs: &dyn DocumentStore, attempt: &mut Attempt) -> Vec<String> {
        let items = match self.read_legacy_json(PROMPTS_KEY) {
            Ok(Some(Value::Array(items))) => items,
            Ok(Some(other)) => {
                attempt.rejected.push(format!(
                    "{PROMPTS_KEY}: expected array, got {}",
                    json_type(&other)
                ));
                return Vec::new();
            }
            Ok(None) => return Vec::new(),
            Err(message) => {
                attempt.rejected.push(message);
                return Vec::new();
            }
        };

        let now = now_millis();
        let mut prompts: Vec<Prompt> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            let prompt = match sanitize_prompt(item, now) {
                Ok(prompt) => prompt,
                Err(err) => {
                    attempt.rejected.push(format!("prompts[{index}]: {err}"));
                    continue;
                }
            };
            match positions.get(&prompt.id) {
                Some(&existing) => {
                    attempt.rejected.push(format!(
                        "prompts[{index}]: duplicate id {}, keeping the most recently updated",
                        prompt.id
                    ));
                    if prompt.updated_at > prompts[existing].updated_at {
                        prompts[existing] = prompt;
                    }
                }
                None => {
                    positions.insert(prompt.id.clone(), prompts.len());
                    prompts.push(prompt);
                }
            }
        }

        let mut written = Vec::new();
        for prompt in prompts {
            let value = match serde_json::to_value(&prompt) {
                Ok(value) => value,
                Err(err) => {
                    attempt.fatal.push(format!("prompt {}: {err}", prompt.id));
                    continue;
                }
            };
            match docs.put(PROMPTS_STORE, &prompt.id, value).await {
                Ok(()) => {
                    attempt.migrated += 1;
                    written.push(prompt.id);
                }
                Err(err) => attempt.fatal.push(format!("prompt {}: {err}", prompt.id)),
            }
        }
        written
    }

    async fn migrate_categories(&self, docs: &dyn DocumentStore, attempt: &mut Attempt) {
        let items = match self.read_legacy_json(CATEGORIES_KEY) {
            Ok(Some(Value::Array(items))) => items,
            Ok(Some(other)) => {
                attempt.rejected.push(format!(
                    "{CATEGORIES_KEY}: expected array, got {}",
                    json_type(&other)
                ));
                return;
            }
            Ok(None) => return,
            Err(message) => {
                attempt.rejected.push(message);
                return;
            }
        };

        let mut categories = Vec::new();
        let names = items.into_iter().filter_map(|item| match item {
            Value::String(name) => Some(name),
            _ => None,
        });
        merge_categories(&mut categories, names);
        let value = Value::from(categories);
        if let Err(err) = docs.put(CATEGORIES_STORE, CATEGORY_LIST_KEY, value).await {
            attempt.fatal.push(format!("categories: {err}"));
        }
    }

    async fn migrate_settings(&self, docs: &dyn DocumentStore, attempt: &mut Attempt) {
        let mut settings: Vec<(String, Value)> = Vec::new();

        if let Ok(Some(raw)) = self.kv.get(THEME_KEY) {
            // Older versions stored the theme JSON-encoded
            let name = match serde_json::from_str::<Value>(&raw) {
                Ok(Value::String(name)) => name,
                _ => raw,
            };
            match name.parse::<Theme>() {
                Ok(theme) => settings.push((THEME_SETTING.to_string(), Value::from(theme.to_string()))),
                Err(err) => attempt.rejected.push(format!("{THEME_KEY}: {err}")),
            }
        }

        match self.read_legacy_json(FILTERS_KEY) {
            Ok(Some(value @ Value::Object(_))) => settings.push((FILTERS_SETTING.to_string(), value)),
            Ok(Some(other)) => attempt.rejected.push(format!(
                "{FILTERS_KEY}: expected object, got {}",
                json_type(&other)
            )),
            Ok(None) => {}
            Err(message) => attempt.rejected.push(message),
        }

        match self.kv.keys() {
            Ok(keys) => {
                for key in keys {
                    let Some(name) = key.strip_prefix(SETTING_KEY_PREFIX) else {
                        continue;
                    };
                    if let Ok(Some(raw)) = self.kv.get(&key) {
                        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                        settings.push((name.to_string(), value));
                    }
                }
            }
            Err(err) => attempt.rejected.push(format!("settings: {err}")),
        }

        for (name, value) in settings {
            if let Err(err) = docs.put(SETTINGS_STORE, &name, value).await {
                attempt.fatal.push(format!("settings.{name}: {err}"));
            }
        }
    }

    /// Read and parse a legacy key; parse failures become an error message
    fn read_legacy_json(&self, key: &str) -> Result<Option<Value>, String> {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => return Err(format!("{key}: {err}")),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| format!("{key}: corrupt JSON: {err}"))
    }

    /// Snapshot of prompts, categories, settings and migration status
    pub async fn export_all_data(&self, repo: &PromptRepository) -> RepositoryResult<ExportBundle> {
        let bundle = ExportBundle {
            version: DATA_FORMAT_VERSION.to_string(),
            exported_at: now_millis(),
            prompts: repo.list_all().await?,
            categories: repo.categories().await?,
            settings: repo
                .settings()
                .await?
                .iter()
                .map(|(name, value)| (name.clone(), setting_text(value)))
                .collect(),
            migration_status: self.get_migration_status(),
        };
        info!("Exported {} prompts", bundle.prompts.len());
        Ok(bundle)
    }

    /// Import a bundle field by field.
    ///
    /// A field that is present with the wrong type records one error and is
    /// skipped; absent fields are ignored. Each successful write counts.
    pub async fn import_data(&self, repo: &PromptRepository, bundle: &Value) -> ImportResult {
        let mut imported = 0;
        let mut errors = Vec::new();

        let Some(fields) = bundle.as_object() else {
            return ImportResult {
                success: false,
                imported_items: 0,
                errors: vec![format!("bundle: expected object, got {}", json_type(bundle))],
            };
        };

        if let Some(version) = fields.get("version") {
            if !version.is_string() {
                errors.push(format!("version: expected string, got {}", json_type(version)));
            }
        }

        match fields.get("prompts") {
            None => {}
            Some(Value::Array(items)) => {
                let now = now_millis();
                for (index, item) in items.iter().enumerate() {
                    let prompt = match sanitize_prompt(item, now) {
                        Ok(prompt) => prompt,
                        Err(err) => {
                            errors.push(format!("prompts[{index}]: {err}"));
                            continue;
                        }
                    };
                    match repo.upsert(prompt).await {
                        Ok(_) => imported += 1,
                        Err(err) => errors.push(format!("prompts[{index}]: {err}")),
                    }
                }
            }
            Some(other) => errors.push(format!("prompts: expected array, got {}", json_type(other))),
        }

        match fields.get("categories") {
            None => {}
            Some(Value::Array(items)) => {
                let mut names = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    match item {
                        Value::String(name) => names.push(name.clone()),
                        other => errors.push(format!(
                            "categories[{index}]: expected string, got {}",
                            json_type(other)
                        )),
                    }
                }
                let added = names.len();
                let result = match repo.categories().await {
                    Ok(mut categories) => {
                        merge_categories(&mut categories, names);
                        repo.set_categories(categories).await
                    }
                    Err(err) => Err(err),
                };
                match result {
                    Ok(_) => imported += added,
                    Err(err) => errors.push(format!("categories: {err}")),
                }
            }
            Some(other) => errors.push(format!(
                "categories: expected array, got {}",
                json_type(other)
            )),
        }

        match fields.get("settings") {
            None => {}
            Some(Value::Object(settings)) => {
                for (name, value) in settings {
                    let value = match decode_setting(name, value) {
                        Ok(value) => value,
                        Err(message) => {
                            errors.push(format!("settings.{name}: {message}"));
                            continue;
                        }
                    };
                    match repo.set_setting(name, value).await {
                        Ok(()) => imported += 1,
                        Err(err) => errors.push(format!("settings.{name}: {err}")),
                    }
                }
            }
            Some(other) => errors.push(format!(
                "settings: expected object, got {}",
                json_type(other)
            )),
        }

        info!("Imported {} items with {} errors", imported, errors.len());
        ImportResult {
            success: errors.is_empty(),
            imported_items: imported,
            errors,
        }
    }

    /// Factory reset: wipe app keys and app object stores. Safe to repeat.
    pub async fn clear_all_data(&self, repo: &PromptRepository) -> RepositoryResult<()> {
        let removed = repo.clear_all().await?;

        if let Some(docs) = &self.documents {
            for store in APP_STORES {
                match docs.clear(store).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        for key in self.kv.keys()? {
            if is_app_key(&key) {
                self.kv.remove(&key)?;
            }
        }
        info!("Cleared all app data ({} prompts)", removed);
        Ok(())
    }
}

/// Bundle settings are text; filters may also arrive as an object
fn decode_setting(name: &str, value: &Value) -> Result<Value, String> {
    match (name, value) {
        (_, Value::Null) => Err("expected value, got null".to_string()),
        (THEME_SETTING, Value::String(theme)) => {
            theme.parse::<Theme>()?;
            Ok(value.clone())
        }
        (THEME_SETTING, other) => Err(format!("expected string, got {}", json_type(other))),
        (FILTERS_SETTING, Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(filters @ Value::Object(_)) => Ok(filters),
            Ok(other) => Err(format!("expected object, got {}", json_type(&other))),
            Err(err) => Err(format!("invalid JSON: {err}")),
        },
        (FILTERS_SETTING, Value::Object(_)) => Ok(value.clone()),
        (FILTERS_SETTING, other) => Err(format!(
            "expected string or object, got {}",
            json_type(other)
        )),
        _ => Ok(value.clone()),
    }
}
