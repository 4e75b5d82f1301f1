//! Debug hooks and test doubles.
//!
//! Compiled only for tests or with the `diagnostics` feature.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::App;
use crate::events::{ChangeEvent, ChangeObserver};
use crate::migration::MigrationStatus;
use crate::runner::{OutputStream, PromptRunner, RunConfig, RunnerError};
use crate::storage::{DocumentStore, StorageError, StorageMode, StorageResult};

/// Point-in-time summary of the running app
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub storage_mode: StorageMode,
    pub migration_status: MigrationStatus,
    pub active_prompts: usize,
    pub trashed_prompts: usize,
    pub analytics_available: bool,
    pub mirror_rows: Option<usize>,
    pub events_emitted: u64,
    pub subscribers: usize,
}

impl DiagnosticsReport {
    pub async fn collect(app: &App) -> anyhow::Result<Self> {
        let repo = app.repository();
        let mirror_rows = match app.analytics().adapter() {
            Some(adapter) => Some(adapter.mirror_row_count()?),
            None => None,
        };
        Ok(Self {
            storage_mode: app.storage_mode(),
            migration_status: app.migration().get_migration_status(),
            active_prompts: repo.list_active().await?.len(),
            trashed_prompts: repo.list_trash().await?.len(),
            analytics_available: app.analytics().is_available(),
            mirror_rows,
            events_emitted: app.bus().emitted(),
            subscribers: app.bus().subscriber_count(),
        })
    }
}

/// Observer that keeps every event it receives
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events rendered as `TYPE:id`
    pub fn summary(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| format!("{}:{}", event.event_type(), event.prompt_id()))
            .collect()
    }
}

impl ChangeObserver for RecordingObserver {
    fn on_event(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording observer poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Runner that replays fixed chunks, optionally pausing between them
pub struct ScriptedRunner {
    chunks: Vec<String>,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// End the stream with a provider error after the chunks
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromptRunner for ScriptedRunner {
    async fn run_stream(
        &self,
        _prompt_text: &str,
        _config: &RunConfig,
    ) -> Result<OutputStream, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let items: Vec<Result<String, RunnerError>> = self
            .chunks
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.failure.clone().map(|m| Err(RunnerError::Provider(m))))
            .collect();
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(stream.boxed())
    }
}

/// Document store wrapper whose writes can be made to fail or stall
pub struct FlakyDocumentStore {
    inner: Arc<dyn DocumentStore>,
    failing_keys: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    put_delay: Mutex<Option<Duration>>,
    puts: AtomicUsize,
}

impl FlakyDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing_keys: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            put_delay: Mutex::new(None),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn fail_puts_for(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    pub fn fail_all_puts(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.clear();
        }
    }

    pub fn set_put_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.put_delay.lock() {
            *slot = delay;
        }
    }

    /// Successful puts so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn should_fail(&self, key: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_keys
                .lock()
                .map(|keys| keys.contains(key))
                .unwrap_or(false)
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn store_names(&self) -> Vec<String> {
        self.inner.store_names()
    }

    async fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>> {
        self.inner.get(store, key).await
    }

    async fn put(&self, store: &str, key: &str, value: Value) -> StorageResult<()> {
        let delay = self.put_delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(key) {
            return Err(StorageError::unavailable(format!("injected failure for {store}/{key}")));
        }
        self.inner.put(store, key, value).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> StorageResult<()> {
        self.inner.delete(store, key).await
    }

    async fn get_all(&self, store: &str) -> StorageResult<Vec<(String, Value)>> {
        self.inner.get_all(store).await
    }

    async fn count(&self, store: &str) -> StorageResult<usize> {
        self.inner.count(store).await
    }

    async fn clear(&self, store: &str) -> StorageResult<()> {
        self.inner.clear(store).await
    }
}
