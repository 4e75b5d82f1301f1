//! Primary prompt store.
//!
//! [`PromptRepository`] is the only writer of prompt data. Every mutation
//! path goes through it: editor actions, autosave, streaming checkpoints,
//! console CRUD, import and factory reset. Writes are serialized by an async
//! mutex and a [`ChangeEvent`] is emitted only after the write succeeded.
//!
//! Depending on [`StorageMode`] prompts live either as one document per id in
//! the document store, or as a single JSON array in the key-value store.

mod error;


pub use error::{RepositoryError, RepositoryResult};

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::events::{ChangeEvent, ChangeEventBus};
use crate::model::{
    default_categories, merge_categories, normalize_tags, now_millis, sanitize_prompt,
    seed_prompts, DirtyFields, Example, FilterState, FormSnapshot, Prompt, PromptConfig,
    SavedRun, Theme, MAX_HISTORY, MAX_SAVED_RUNS,
};
use crate::storage::schema::{
    setting_key, CATEGORIES_KEY, CATEGORIES_STORE, CATEGORY_LIST_KEY, FILTERS_SETTING,
    PROMPTS_KEY, PROMPTS_STORE, SETTINGS_STORE, SETTING_KEY_PREFIX, THEME_SETTING,
};
use crate::storage::{DocumentStore, KeyValueStore, StorageMode};

/// Bounds applied to per-prompt lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryLimits {
    pub max_history: usize,
    pub max_saved_runs: usize,
}

impl Default for RepositoryLimits {
    fn default() -> Self {
        Self {
            max_history: MAX_HISTORY,
            max_saved_runs: MAX_SAVED_RUNS,
        }
    }
}

/// Partial update of a prompt. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct PromptPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub system_instruction: Option<Option<String>>,
    pub examples: Option<Vec<Example>>,
    pub config: Option<Option<PromptConfig>>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
}

impl PromptPatch {
    fn apply(self, prompt: &mut Prompt) {
        if let Some(title) = self.title {
            prompt.title = title;
        }
        if let Some(description) = self.description {
            prompt.description = description;
        }
        if let Some(content) = self.content {
            prompt.content = content;
        }
        if let Some(system_instruction) = self.system_instruction {
            prompt.system_instruction = system_instruction;
        }
        if let Some(examples) = self.examples {
            prompt.examples = examples;
        }
        if let Some(config) = self.config {
            prompt.config = config;
        }
        if let Some(category) = self.category {
            prompt.category = category;
        }
        if let Some(tags) = self.tags {
            prompt.tags = normalize_tags(tags);
        }
        if let Some(is_favorite) = self.is_favorite {
            prompt.is_favorite = is_favorite;
        }
    }
}

pub struct PromptRepository {
    kv: Arc<dyn KeyValueStore>,
    documents: Option<Arc<dyn DocumentStore>>,
    mode: StorageMode,
    bus: Arc<ChangeEventBus>,
    limits: RepositoryLimits,
    write_lock: Mutex<()>,
}

impl PromptRepository {
    /// Create a repository writing to the backend selected by `mode`.
    ///
    /// Document mode without a document store falls back to key-value only.
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        documents: Option<Arc<dyn DocumentStore>>,
        mode: StorageMode,
        bus: Arc<ChangeEventBus>,
    ) -> Self {
        let mode = match (mode, &documents) {
            (StorageMode::Document, None) => {
                warn!("Document mode requested without a document store, using key-value storage");
                StorageMode::KeyValueOnly
            }
            (mode, _) => mode,
        };
        Self {
            kv,
            documents,
            mode,
            bus,
            limits: RepositoryLimits::default(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_limits(mut self, limits: RepositoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn bus(&self) -> &Arc<ChangeEventBus> {
        &self.bus
    }

    pub fn limits(&self) -> RepositoryLimits {
        self.limits
    }

    /// The document store, only when it holds the canonical data
    fn document_store(&self) -> Option<&Arc<dyn DocumentStore>> {
        match self.mode {
            StorageMode::Document => self.documents.as_ref(),
            StorageMode::KeyValueOnly => None,
        }
    }

    // ------------------------------------------------------------------
    // Backend access
    // ------------------------------------------------------------------

    async fn load_all(&self) -> RepositoryResult<Vec<Prompt>> {
        let now = now_millis();
        if let Some(docs) = self.document_store() {
            let mut prompts = Vec::new();
            for (key, value) in docs.get_all(PROMPTS_STORE).await? {
                match decode_stored(&value, now) {
                    Ok(prompt) => prompts.push(prompt),
                    Err(err) => warn!("Skipping unreadable prompt document {}: {}", key, err),
                }
            }
            return Ok(prompts);
        }

        let Some(raw) = self.kv.get(PROMPTS_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Ok(items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| match decode_stored(item, now) {
                    Ok(prompt) => Some(prompt),
                    Err(err) => {
                        warn!("Skipping stored prompt #{}: {}", index, err);
                        None
                    }
                })
                .collect()),
            _ => {
                warn!("Stored prompt data is corrupt, restoring the starter prompts");
                let seeds = seed_prompts(now);
                self.save_all_kv(&seeds)?;
                Ok(seeds)
            }
        }
    }

    fn save_all_kv(&self, prompts: &[Prompt]) -> RepositoryResult<()> {
        let encoded = serde_json::to_string(prompts)?;
        self.kv.set(PROMPTS_KEY, &encoded)?;
        Ok(())
    }

    /// The key-value prompt array as stored. Entries that do not decode are
    /// returned untouched so a rewrite never drops them.
    async fn kv_items(&self) -> RepositoryResult<Vec<Value>> {
        let Some(raw) = self.kv.get(PROMPTS_KEY)? else {
            return Ok(Vec::new());
        };
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&raw) {
            return Ok(items);
        }
        // Corrupt: loading reseeds the array
        let seeds = self.load_all().await?;
        Ok(seeds
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?)
    }

    fn save_kv_items(&self, items: &[Value]) -> RepositoryResult<()> {
        self.kv.set(PROMPTS_KEY, &serde_json::to_string(items)?)?;
        Ok(())
    }

    async fn load(&self, id: &str) -> RepositoryResult<Option<Prompt>> {
        if let Some(docs) = self.document_store() {
            return match docs.get(PROMPTS_STORE, id).await? {
                Some(value) => decode_stored(&value, now_millis())
                    .map(Some)
                    .map_err(RepositoryError::Invalid),
                None => Ok(None),
            };
        }
        Ok(self.load_all().await?.into_iter().find(|p| p.id == id))
    }

    async fn store(&self, prompt: &Prompt) -> RepositoryResult<()> {
        let value = serde_json::to_value(prompt)?;
        if let Some(docs) = self.document_store() {
            docs.put(PROMPTS_STORE, &prompt.id, value).await?;
            return Ok(());
        }
        let mut items = self.kv_items().await?;
        match items
            .iter_mut()
            .find(|item| raw_id(item).as_deref() == Some(prompt.id.as_str()))
        {
            Some(slot) => *slot = value,
            None => items.push(value),
        }
        self.save_kv_items(&items)
    }

    async fn erase(&self, id: &str) -> RepositoryResult<()> {
        if let Some(docs) = self.document_store() {
            docs.delete(PROMPTS_STORE, id).await?;
            return Ok(());
        }
        let mut items = self.kv_items().await?;
        items.retain(|item| raw_id(item).as_deref() != Some(id));
        self.save_kv_items(&items)
    }

    async fn require(&self, id: &str) -> RepositoryResult<Prompt> {
        self.load(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    /// Read, modify and write one prompt under the write lock, then emit
    async fn modify<F>(&self, id: &str, change: F) -> RepositoryResult<Prompt>
    where
        F: FnOnce(&mut Prompt) -> RepositoryResult<bool>,
    {
        let _guard = self.write_lock.lock().await;
        let mut prompt = self.require(id).await?;
        if !change(&mut prompt)? {
            return Ok(prompt);
        }
        self.store(&prompt).await?;
        self.bus.emit(ChangeEvent::PromptUpdated(prompt.clone()));
        Ok(prompt)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> RepositoryResult<Option<Prompt>> {
        self.load(id).await
    }

    /// Prompts not in the trash, most recently updated first
    pub async fn list_active(&self) -> RepositoryResult<Vec<Prompt>> {
        let mut prompts: Vec<Prompt> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|p| !p.is_deleted())
            .collect();
        prompts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(prompts)
    }

    /// Soft-deleted prompts, most recently deleted first
    pub async fn list_trash(&self) -> RepositoryResult<Vec<Prompt>> {
        let mut prompts: Vec<Prompt> = self
            .load_all()
            .await?
            .into_iter()
            .filter(Prompt::is_deleted)
            .collect();
        prompts.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(prompts)
    }

    /// Every prompt including the trash, ordered by id
    pub async fn list_all(&self) -> RepositoryResult<Vec<Prompt>> {
        let mut prompts = self.load_all().await?;
        prompts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(prompts)
    }

    /// Hand every prompt to `read` while writes are held off.
    ///
    /// No write, and so no change event, can land between taking the
    /// snapshot and `read` returning.
    pub async fn with_snapshot<T, F>(&self, read: F) -> RepositoryResult<T>
    where
        F: FnOnce(&[Prompt]) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let prompts = self.load_all().await?;
        Ok(read(&prompts))
    }

    pub async fn count(&self) -> RepositoryResult<usize> {
        if let Some(docs) = self.document_store() {
            return Ok(docs.count(PROMPTS_STORE).await?);
        }
        Ok(self.load_all().await?.len())
    }

    // ------------------------------------------------------------------
    // Prompt mutations
    // ------------------------------------------------------------------

    /// Insert a new prompt. Fails if the id is taken, including by the trash.
    pub async fn create(&self, mut prompt: Prompt) -> RepositoryResult<Prompt> {
        if prompt.id.trim().is_empty() {
            return Err(RepositoryError::Invalid("prompt id is empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        if self.load(&prompt.id).await?.is_some() {
            return Err(RepositoryError::DuplicateId(prompt.id));
        }

        let now = now_millis();
        prompt.created_at = now;
        prompt.updated_at = now;
        prompt.tags = normalize_tags(&prompt.tags);
        self.store(&prompt).await?;
        info!("Created prompt {}", prompt.id);
        self.bus.emit(ChangeEvent::PromptCreated(prompt.clone()));
        Ok(prompt)
    }

    /// Write a prompt as given, creating or replacing it.
    ///
    /// Used for imports and console writes. Returns true when the prompt was new.
    pub async fn upsert(&self, mut prompt: Prompt) -> RepositoryResult<bool> {
        if prompt.id.trim().is_empty() {
            return Err(RepositoryError::Invalid("prompt id is empty".to_string()));
        }
        prompt.tags = normalize_tags(&prompt.tags);
        prompt.history.truncate(self.limits.max_history);
        prompt.saved_runs.truncate(self.limits.max_saved_runs);

        let _guard = self.write_lock.lock().await;
        let created = self.load(&prompt.id).await?.is_none();
        self.store(&prompt).await?;
        let event = if created {
            ChangeEvent::PromptCreated(prompt)
        } else {
            ChangeEvent::PromptUpdated(prompt)
        };
        self.bus.emit(event);
        Ok(created)
    }

    /// Apply `patch`, snapshotting history when a substantive field changed
    pub async fn update(&self, id: &str, patch: PromptPatch) -> RepositoryResult<Prompt> {
        let limits = self.limits;
        self.modify(id, move |prompt| {
            let before = prompt.clone();
            patch.apply(prompt);
            Ok(finish_edit(&before, prompt, limits))
        })
        .await
    }

    /// Copy the `dirty` fields of an editor form onto the stored prompt
    pub async fn apply_form(
        &self,
        id: &str,
        form: &FormSnapshot,
        dirty: DirtyFields,
    ) -> RepositoryResult<Prompt> {
        let limits = self.limits;
        self.modify(id, move |prompt| {
            let before = prompt.clone();
            form.apply_to(prompt, dirty);
            Ok(finish_edit(&before, prompt, limits))
        })
        .await
    }

    /// Move a prompt to the trash
    pub async fn soft_delete(&self, id: &str) -> RepositoryResult<Prompt> {
        self.modify(id, |prompt| {
            if prompt.is_deleted() {
                return Ok(false);
            }
            let now = now_millis();
            prompt.deleted_at = Some(now);
            prompt.updated_at = now;
            Ok(true)
        })
        .await
    }

    /// Take a prompt back out of the trash
    pub async fn restore(&self, id: &str) -> RepositoryResult<Prompt> {
        self.modify(id, |prompt| {
            if !prompt.is_deleted() {
                return Ok(false);
            }
            prompt.deleted_at = None;
            prompt.updated_at = now_millis();
            Ok(true)
        })
        .await
    }

    /// Remove a prompt irreversibly
    pub async fn permanent_delete(&self, id: &str) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        self.require(id).await?;
        self.erase(id).await?;
        info!("Permanently deleted prompt {}", id);
        self.bus.emit(ChangeEvent::PromptDeleted { id: id.to_string() });
        Ok(())
    }

    /// Permanently delete everything in the trash. Returns the number removed.
    pub async fn empty_trash(&self) -> RepositoryResult<usize> {
        let _guard = self.write_lock.lock().await;
        let trashed: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .filter(Prompt::is_deleted)
            .map(|p| p.id)
            .collect();
        for id in &trashed {
            self.erase(id).await?;
            self.bus.emit(ChangeEvent::PromptDeleted { id: id.clone() });
        }
        Ok(trashed.len())
    }

    pub async fn toggle_favorite(&self, id: &str) -> RepositoryResult<Prompt> {
        self.modify(id, |prompt| {
            prompt.is_favorite = !prompt.is_favorite;
            Ok(true)
        })
        .await
    }

    /// Roll back to a history version; the current state is snapshotted first
    pub async fn restore_version(&self, id: &str, version_id: &str) -> RepositoryResult<Prompt> {
        let limits = self.limits;
        self.modify(id, move |prompt| {
            let version = prompt
                .history
                .iter()
                .find(|v| v.id == version_id)
                .cloned()
                .ok_or_else(|| RepositoryError::VersionNotFound {
                    id: prompt.id.clone(),
                    version: version_id.to_string(),
                })?;
            let now = now_millis();
            let snapshot = prompt.to_version(now);
            prompt.push_history(snapshot, limits.max_history);
            prompt.title = version.title;
            prompt.content = version.content;
            prompt.system_instruction = version.system_instruction;
            prompt.examples = version.examples;
            prompt.config = version.config;
            prompt.updated_at = now;
            Ok(true)
        })
        .await
    }

    /// Merge a run into `savedRuns` without touching any other field
    pub async fn record_run(&self, id: &str, run: SavedRun) -> RepositoryResult<Prompt> {
        let max = self.limits.max_saved_runs;
        self.modify(id, move |prompt| {
            prompt.push_run(run, max);
            Ok(true)
        })
        .await
    }

    pub async fn update_variable_values(
        &self,
        id: &str,
        values: BTreeMap<String, String>,
    ) -> RepositoryResult<Prompt> {
        self.modify(id, move |prompt| {
            if prompt.last_variable_values == values {
                return Ok(false);
            }
            prompt.last_variable_values = values;
            Ok(true)
        })
        .await
    }

    /// Delete every prompt, emitting a deletion for each. Returns the number removed.
    pub async fn clear_all(&self) -> RepositoryResult<usize> {
        let _guard = self.write_lock.lock().await;
        let ids: Vec<String> = self.load_all().await?.into_iter().map(|p| p.id).collect();
        match self.document_store() {
            Some(docs) => docs.clear(PROMPTS_STORE).await?,
            None => self.kv.remove(PROMPTS_KEY)?,
        }
        for id in &ids {
            self.bus.emit(ChangeEvent::PromptDeleted { id: id.clone() });
        }
        debug!("Cleared {} prompts", ids.len());
        Ok(ids.len())
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    /// Category list, or the defaults when none is stored or it is unreadable
    pub async fn categories(&self) -> RepositoryResult<Vec<String>> {
        let stored = match self.document_store() {
            Some(docs) => docs.get(CATEGORIES_STORE, CATEGORY_LIST_KEY).await?,
            None => match self.kv.get(CATEGORIES_KEY)? {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!("Stored categories are corrupt, using defaults: {}", err);
                        None
                    }
                },
                None => None,
            },
        };
        match stored {
            Some(value) => match serde_json::from_value::<Vec<String>>(value) {
                Ok(list) => Ok(list),
                Err(err) => {
                    warn!("Stored categories are not a string list, using defaults: {}", err);
                    Ok(default_categories())
                }
            },
            None => Ok(default_categories()),
        }
    }

    /// Replace the category list; blanks and duplicates are dropped
    pub async fn set_categories(&self, categories: Vec<String>) -> RepositoryResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        self.write_categories(categories).await
    }

    /// Append a custom category
    pub async fn add_category(&self, name: &str) -> RepositoryResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let mut categories = self.categories().await?;
        merge_categories(&mut categories, [name.to_string()]);
        self.write_categories(categories).await
    }

    async fn write_categories(&self, categories: Vec<String>) -> RepositoryResult<Vec<String>> {
        let mut cleaned = Vec::new();
        merge_categories(&mut cleaned, categories);
        match self.document_store() {
            Some(docs) => {
                docs.put(
                    CATEGORIES_STORE,
                    CATEGORY_LIST_KEY,
                    serde_json::to_value(&cleaned)?,
                )
                .await?
            }
            None => self.kv.set(CATEGORIES_KEY, &serde_json::to_string(&cleaned)?)?,
        }
        Ok(cleaned)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub async fn setting(&self, name: &str) -> RepositoryResult<Option<Value>> {
        if let Some(docs) = self.document_store() {
            return Ok(docs.get(SETTINGS_STORE, name).await?);
        }
        Ok(self
            .kv
            .get(&setting_key(name))?
            .map(|raw| decode_kv_setting(name, raw)))
    }

    pub async fn set_setting(&self, name: &str, value: Value) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(docs) = self.document_store() {
            docs.put(SETTINGS_STORE, name, value).await?;
            return Ok(());
        }
        let raw = match (name, &value) {
            (THEME_SETTING, Value::String(theme)) => theme.clone(),
            _ => serde_json::to_string(&value)?,
        };
        self.kv.set(&setting_key(name), &raw)?;
        Ok(())
    }

    /// Every stored setting by name
    pub async fn settings(&self) -> RepositoryResult<BTreeMap<String, Value>> {
        if let Some(docs) = self.document_store() {
            return Ok(docs.get_all(SETTINGS_STORE).await?.into_iter().collect());
        }
        let mut settings = BTreeMap::new();
        for name in [THEME_SETTING, FILTERS_SETTING] {
            if let Some(raw) = self.kv.get(&setting_key(name))? {
                settings.insert(name.to_string(), decode_kv_setting(name, raw));
            }
        }
        for key in self.kv.keys()? {
            if let Some(name) = key.strip_prefix(SETTING_KEY_PREFIX) {
                if let Some(raw) = self.kv.get(&key)? {
                    settings.insert(name.to_string(), decode_kv_setting(name, raw));
                }
            }
        }
        Ok(settings)
    }

    pub async fn theme(&self) -> RepositoryResult<Theme> {
        let theme = match self.setting(THEME_SETTING).await? {
            Some(Value::String(name)) => name.parse().unwrap_or_else(|err| {
                warn!("{}, using the default theme", err);
                Theme::default()
            }),
            _ => Theme::default(),
        };
        Ok(theme)
    }

    pub async fn set_theme(&self, theme: Theme) -> RepositoryResult<()> {
        self.set_setting(THEME_SETTING, Value::String(theme.to_string()))
            .await
    }

    pub async fn filters(&self) -> RepositoryResult<FilterState> {
        let filters = match self.setting(FILTERS_SETTING).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                warn!("Stored filters are unreadable, resetting: {}", err);
                FilterState::default()
            }),
            None => FilterState::default(),
        };
        Ok(filters)
    }

    pub async fn set_filters(&self, filters: &FilterState) -> RepositoryResult<()> {
        self.set_setting(FILTERS_SETTING, serde_json::to_value(filters)?)
            .await
    }
}

/// Stamp an edit and snapshot history if it changed a substantive field.
/// Returns false when nothing changed at all.
fn finish_edit(before: &Prompt, after: &mut Prompt, limits: RepositoryLimits) -> bool {
    if before == after {
        return false;
    }
    let now = now_millis();
    if before.differs_substantively(after) {
        after.push_history(before.to_version(now), limits.max_history);
    }
    after.updated_at = now.max(before.updated_at);
    true
}

/// Records written by this crate decode as they are; older shapes take the lenient path
fn decode_stored(value: &Value, now: i64) -> Result<Prompt, String> {
    match Prompt::deserialize(value) {
        Ok(prompt) => Ok(prompt),
        Err(_) => sanitize_prompt(value, now),
    }
}

/// Id of a raw stored entry, with the same coercion the lenient decoder applies
fn raw_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Theme is stored as a bare string, everything else as JSON
fn decode_kv_setting(name: &str, raw: String) -> Value {
    if name == THEME_SETTING {
        return Value::String(raw);
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}
