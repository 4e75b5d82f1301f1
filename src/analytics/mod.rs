//! Embedded SQL mirror of the prompt library.
//!
//! The mirror is a read model: it follows the primary store through the
//! [`ChangeEventBus`](crate::events::ChangeEventBus) and can be rebuilt from
//! it at any time. Console writes to prompts go through the repository, never
//! straight into the mirror.

mod console;
mod error;
mod schema;

#[cfg(test)]
mod tests;

pub use console::{QueryHistoryEntry, QueryResult, SqlFavorite};
pub use error::{AnalyticsError, AnalyticsResult};

use rusqlite::Connection;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::events::{ChangeEvent, SubscriptionId};
use crate::model::Prompt;
use crate::repository::{PromptPatch, PromptRepository};

/// Console behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsOptions {
    /// Run write statements typed into the console, then rebuild the mirror
    pub allow_raw_writes: bool,
    /// Distinct queries kept in the console history
    pub max_query_history: usize,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            allow_raw_writes: false,
            max_query_history: 100,
        }
    }
}

pub struct AnalyticalSyncAdapter {
    conn: Arc<Mutex<Connection>>,
    repository: Arc<PromptRepository>,
    options: AnalyticsOptions,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl AnalyticalSyncAdapter {
    /// Open the mirror database at `path`, or in memory when `None`
    pub fn open(
        path: Option<&Path>,
        repository: Arc<PromptRepository>,
        options: AnalyticsOptions,
    ) -> AnalyticsResult<Self> {
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                debug!("Opening SQL mirror at {}", path.display());
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        schema::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            repository,
            options,
            subscription: Mutex::new(None),
        })
    }

    fn lock(&self) -> AnalyticsResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AnalyticsError::Poisoned)
    }

    pub fn options(&self) -> AnalyticsOptions {
        self.options
    }

    /// Create mirror and console tables if missing
    pub fn initialize_tables(&self) -> AnalyticsResult<()> {
        self.lock()?.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    /// Subscribe the mirror to repository changes. Calling twice is a no-op.
    pub fn start_sync(&self) {
        let Ok(mut subscription) = self.subscription.lock() else {
            warn!("Mirror subscription lock poisoned, sync not started");
            return;
        };
        if subscription.is_some() {
            return;
        }
        let conn = Arc::clone(&self.conn);
        let id = self
            .repository
            .bus()
            .subscribe(move |event: &ChangeEvent| -> anyhow::Result<()> {
                let conn = conn
                    .lock()
                    .map_err(|_| anyhow::anyhow!("mirror connection lock poisoned"))?;
                schema::apply_event(&conn, event)?;
                Ok(())
            });
        *subscription = Some(id);
        debug!("SQL mirror sync started");
    }

    pub fn stop_sync(&self) {
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(id) = subscription.take() {
                self.repository.bus().unsubscribe(id);
                debug!("SQL mirror sync stopped");
            }
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.subscription
            .lock()
            .map(|subscription| subscription.is_some())
            .unwrap_or(false)
    }

    /// Rebuild the mirror from the primary store. Returns the row count.
    ///
    /// The snapshot is taken and applied under the repository's write lock,
    /// so an event emitted meanwhile cannot be overwritten with stale rows.
    pub async fn resync(&self) -> AnalyticsResult<usize> {
        let count = self
            .repository
            .with_snapshot(|prompts| -> AnalyticsResult<usize> {
                let mut conn = self.lock()?;
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM prompts", [])?;
                for prompt in prompts {
                    schema::upsert_prompt(&tx, prompt)?;
                }
                tx.commit()?;
                Ok(prompts.len())
            })
            .await??;
        info!("SQL mirror rebuilt with {} prompts", count);
        Ok(count)
    }

    pub fn mirror_row_count(&self) -> AnalyticsResult<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM prompts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Apply an event directly when the mirror is not subscribed
    fn apply_unsynced(&self, event: &ChangeEvent) -> AnalyticsResult<()> {
        if self.is_syncing() {
            return Ok(());
        }
        schema::apply_event(&*self.lock()?, event)
    }

    // ------------------------------------------------------------------
    // Console CRUD, routed through the primary store
    // ------------------------------------------------------------------

    pub async fn create_prompt(&self, prompt: Prompt) -> AnalyticsResult<Prompt> {
        let created = self.repository.create(prompt).await?;
        self.apply_unsynced(&ChangeEvent::PromptCreated(created.clone()))?;
        Ok(created)
    }

    pub async fn update_prompt(&self, id: &str, patch: PromptPatch) -> AnalyticsResult<Prompt> {
        let updated = self.repository.update(id, patch).await?;
        self.apply_unsynced(&ChangeEvent::PromptUpdated(updated.clone()))?;
        Ok(updated)
    }

    /// Permanently delete a prompt
    pub async fn delete_prompt_by_id(&self, id: &str) -> AnalyticsResult<()> {
        self.repository.permanent_delete(id).await?;
        self.apply_unsynced(&ChangeEvent::PromptDeleted { id: id.to_string() })
    }

    // ------------------------------------------------------------------
    // Console queries
    // ------------------------------------------------------------------

    /// Execute one statement typed into the console.
    ///
    /// Read-only statements always run. Writes run only with
    /// `allow_raw_writes`, after which the mirror is rebuilt from the primary
    /// store. Every attempt is recorded in the query history.
    pub async fn execute_sql(&self, sql: &str) -> AnalyticsResult<QueryResult> {
        let sql = sql.trim();
        let outcome = {
            let conn = self.lock()?;
            let outcome = console::run_statement(&conn, sql, self.options.allow_raw_writes);
            if let Err(err) =
                console::record_history(&conn, sql, &outcome, self.options.max_query_history)
            {
                warn!("Failed to record query history: {}", err);
            }
            outcome
        };

        let result = outcome?;
        if !result.read_only {
            warn!("Raw SQL write executed, rebuilding mirror from the primary store");
            self.resync().await?;
        }
        Ok(result)
    }

    /// Most recent distinct queries, newest first
    pub fn query_history(&self) -> AnalyticsResult<Vec<QueryHistoryEntry>> {
        console::query_history(&*self.lock()?, self.options.max_query_history)
    }

    pub fn clear_query_history(&self) -> AnalyticsResult<()> {
        console::clear_history(&*self.lock()?)
    }

    /// Create a favorite, or update the one with `id`
    pub fn save_favorite(
        &self,
        id: Option<&str>,
        name: &str,
        sql: &str,
    ) -> AnalyticsResult<SqlFavorite> {
        console::save_favorite(&*self.lock()?, id, name, sql)
    }

    pub fn favorites(&self) -> AnalyticsResult<Vec<SqlFavorite>> {
        console::list_favorites(&*self.lock()?)
    }

    pub fn delete_favorite(&self, id: &str) -> AnalyticsResult<bool> {
        console::delete_favorite(&*self.lock()?, id)
    }
}

impl fmt::Debug for AnalyticalSyncAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticalSyncAdapter")
            .field("options", &self.options)
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

impl Drop for AnalyticalSyncAdapter {
    fn drop(&mut self) {
        self.stop_sync();
    }
}
