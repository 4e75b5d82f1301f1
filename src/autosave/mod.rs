//! Optimistic autosave for one prompt editing session.
//!
//! Each session is a single task that owns every timer: the debounce
//! deadline, the checkpoint deadline and the in-flight save. The editor talks
//! to it through an [`AutosaveHandle`] and observes it through a
//! [`tokio::sync::watch`] status channel.
//!
//! ```text
//! Clean --edit--> Dirty --debounce--> Saving --ok--> Clean
//!                   ^                   |
//!                   +--error / edit-----+
//! ```

mod checkpoint;
mod controller;
mod error;

#[cfg(test)]
mod tests;

pub use checkpoint::StreamCheckpointer;
pub use controller::AutosaveController;
pub use error::AutosaveError;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::model::{DirtyFields, FormSnapshot, FormState, SavedRun};
use crate::repository::{PromptRepository, RepositoryResult};

/// Timing of an editing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AutosaveSettings {
    /// Quiet period after the last edit before a save starts
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,

    /// Minimum spacing between streaming checkpoint writes
    #[serde(default = "default_checkpoint_interval", with = "humantime_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

fn default_debounce() -> Duration {
    Duration::from_millis(1500)
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePhase {
    #[default]
    Clean,
    Dirty,
    Saving,
}

impl fmt::Display for SavePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SavePhase::Clean => write!(f, "saved"),
            SavePhase::Dirty => write!(f, "unsaved changes"),
            SavePhase::Saving => write!(f, "saving"),
        }
    }
}

/// What the editor shows about the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutosaveStatus {
    pub phase: SavePhase,
    /// Fields that differ from the last persisted snapshot
    pub dirty_fields: DirtyFields,
    pub last_saved_at: Option<i64>,
    /// Error of the most recent failed write, cleared by the next success
    pub last_error: Option<AutosaveError>,
    /// Non-blocking notice, e.g. after recovering an anomalous edit
    pub notice: Option<String>,
    pub saves_completed: u64,
}

/// Answer to a manual save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    NothingToSave,
}

/// Where a session writes its data.
///
/// Form saves touch only the dirty fields and run writes touch only
/// `savedRuns`, so the two never overwrite each other.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn persist_form(
        &self,
        prompt_id: &str,
        form: &FormSnapshot,
        dirty: DirtyFields,
    ) -> RepositoryResult<()>;

    async fn persist_run(&self, prompt_id: &str, run: &SavedRun) -> RepositoryResult<()>;
}

#[async_trait]
impl SessionPersistence for PromptRepository {
    async fn persist_form(
        &self,
        prompt_id: &str,
        form: &FormSnapshot,
        dirty: DirtyFields,
    ) -> RepositoryResult<()> {
        self.apply_form(prompt_id, form, dirty).await.map(|_| ())
    }

    async fn persist_run(&self, prompt_id: &str, run: &SavedRun) -> RepositoryResult<()> {
        self.record_run(prompt_id, run.clone()).await.map(|_| ())
    }
}

type Reply<T> = oneshot::Sender<Result<T, AutosaveError>>;

#[derive(Debug)]
enum Command {
    Edit(FormState),
    SaveNow(Reply<SaveOutcome>),
    Checkpoint(SavedRun),
    CompleteRun(SavedRun, Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Editor-side handle to a running session
#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    prompt_id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<AutosaveStatus>,
}

impl AutosaveHandle {
    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    fn send(&self, command: Command) -> Result<(), AutosaveError> {
        self.commands
            .send(command)
            .map_err(|_| AutosaveError::Closed)
    }

    /// Report the live form values; the session decides whether anything changed
    pub fn edit(&self, form: impl Into<FormState>) -> Result<(), AutosaveError> {
        self.send(Command::Edit(form.into()))
    }

    /// Save immediately, waiting for any in-flight save first
    pub async fn save_now(&self) -> Result<SaveOutcome, AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SaveNow(tx))?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    /// Offer partial output of a running generation. Writes are throttled.
    pub fn checkpoint(&self, run: SavedRun) -> Result<(), AutosaveError> {
        self.send(Command::Checkpoint(run))
    }

    /// Persist a finished generation right away
    pub async fn complete_run(&self, run: SavedRun) -> Result<(), AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CompleteRun(run, tx))?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    pub fn status(&self) -> AutosaveStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AutosaveStatus> {
        self.status.clone()
    }

    /// Stop the session. Pending deadlines are dropped without saving.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
