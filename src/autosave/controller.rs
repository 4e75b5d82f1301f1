use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::{
    AutosaveError, AutosaveHandle, AutosaveSettings, AutosaveStatus, Command, Reply, SaveOutcome,
    SavePhase, SessionPersistence,
};
use crate::model::{now_millis, FormSnapshot, FormState, SavedRun};
use crate::repository::{PromptRepository, RepositoryResult};

/// A form save running on its own task
struct InFlight {
    handle: JoinHandle<RepositoryResult<()>>,
    data: FormSnapshot,
    waiters: Vec<Reply<SaveOutcome>>,
}

/// Session state machine. Lives on the task spawned by [`AutosaveController::spawn`].
pub struct AutosaveController {
    prompt_id: Arc<str>,
    persistence: Arc<dyn SessionPersistence>,
    settings: AutosaveSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<AutosaveStatus>,

    /// Last state known to be persisted
    saved: FormSnapshot,
    /// Current form values, always complete
    live: FormSnapshot,
    debounce_deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    /// Manual saves requested while another save was running
    queued_saves: Vec<Reply<SaveOutcome>>,
    pending_checkpoint: Option<SavedRun>,
    checkpoint_deadline: Option<Instant>,

    last_saved_at: Option<i64>,
    last_error: Option<AutosaveError>,
    notice: Option<String>,
    saves_completed: u64,
}

impl AutosaveController {
    /// Load `prompt_id` from the repository and start a session for it
    pub async fn start(
        repository: Arc<PromptRepository>,
        prompt_id: &str,
        settings: AutosaveSettings,
    ) -> Result<AutosaveHandle, AutosaveError> {
        let prompt = repository
            .get(prompt_id)
            .await?
            .ok_or_else(|| AutosaveError::NotFound(prompt_id.to_string()))?;
        let initial = FormSnapshot::from_prompt(&prompt);
        Ok(Self::spawn(prompt_id, repository, initial, settings))
    }

    /// Start a session whose persisted state is `initial`
    pub fn spawn(
        prompt_id: &str,
        persistence: Arc<dyn SessionPersistence>,
        initial: FormSnapshot,
        settings: AutosaveSettings,
    ) -> AutosaveHandle {
        let prompt_id: Arc<str> = Arc::from(prompt_id);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(AutosaveStatus::default());

        let controller = Self {
            prompt_id: Arc::clone(&prompt_id),
            persistence,
            settings,
            commands,
            status_tx,
            saved: initial.clone(),
            live: initial,
            debounce_deadline: None,
            in_flight: None,
            queued_saves: Vec::new(),
            pending_checkpoint: None,
            checkpoint_deadline: None,
            last_saved_at: None,
            last_error: None,
            notice: None,
            saves_completed: 0,
        };
        tokio::spawn(controller.run());

        AutosaveHandle {
            prompt_id,
            commands: commands_tx,
            status,
        }
    }

    async fn run(mut self) {
        debug!("Autosave session started for prompt {}", self.prompt_id);
        loop {
            let debounce = self.debounce_deadline;
            let checkpoint = self.checkpoint_deadline;
            let saving = self.in_flight.is_some();

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.teardown().await;
                        break;
                    };
                    if !self.handle(command).await {
                        break;
                    }
                }

                joined = join_in_flight(&mut self.in_flight), if saving => {
                    self.finish_save(joined, true);
                }

                _ = sleep_until(debounce.unwrap_or_else(Instant::now)), if debounce.is_some() => {
                    self.debounce_deadline = None;
                    // A save already running re-arms the debounce if edits arrived
                    if self.in_flight.is_none() {
                        self.start_save(Vec::new());
                    }
                }

                _ = sleep_until(checkpoint.unwrap_or_else(Instant::now)), if checkpoint.is_some() => {
                    self.checkpoint_deadline = None;
                    self.flush_checkpoint().await;
                }
            }
        }
        debug!("Autosave session closed for prompt {}", self.prompt_id);
    }

    /// Returns false once the session should stop
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Edit(form) => self.on_edit(form),
            Command::SaveNow(reply) => {
                self.debounce_deadline = None;
                if self.in_flight.is_some() {
                    self.queued_saves.push(reply);
                } else {
                    self.start_save(vec![reply]);
                }
            }
            Command::Checkpoint(mut run) => {
                run.is_checkpoint = true;
                run.completed = false;
                self.pending_checkpoint = Some(run);
                if self.checkpoint_deadline.is_none() {
                    self.checkpoint_deadline =
                        Some(Instant::now() + self.settings.checkpoint_interval);
                }
            }
            Command::CompleteRun(mut run, reply) => {
                run.is_checkpoint = false;
                run.completed = true;
                if self
                    .pending_checkpoint
                    .as_ref()
                    .is_some_and(|pending| pending.id == run.id)
                {
                    self.pending_checkpoint = None;
                    self.checkpoint_deadline = None;
                }
                let result = self.write_run(&run).await;
                let _ = reply.send(result);
            }
            Command::Shutdown(ack) => {
                self.commands.close();
                self.teardown().await;
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn on_edit(&mut self, form: FormState) {
        let resolution = form.resolve(Some(&self.live));
        if resolution.is_recovered() {
            warn!(
                "Edit for prompt {} was missing {}; restored from the last known good state",
                self.prompt_id,
                resolution.recovered.join(", ")
            );
            self.notice = Some(format!(
                "Recovered {} from the last saved state",
                resolution.recovered.join(", ")
            ));
        } else {
            self.notice = None;
        }

        if resolution.snapshot == self.live {
            self.publish();
            return;
        }
        self.live = resolution.snapshot;

        if self.live.diff(&self.saved).is_empty() && self.in_flight.is_none() {
            // Edited back to the persisted state
            self.debounce_deadline = None;
        } else {
            self.debounce_deadline = Some(Instant::now() + self.settings.debounce);
        }
        self.publish();
    }

    fn start_save(&mut self, waiters: Vec<Reply<SaveOutcome>>) {
        let dirty = self.live.diff(&self.saved);
        if dirty.is_empty() {
            for waiter in waiters {
                let _ = waiter.send(Ok(SaveOutcome::NothingToSave));
            }
            self.publish();
            return;
        }

        debug!("Saving {:?} for prompt {}", dirty, self.prompt_id);
        let persistence = Arc::clone(&self.persistence);
        let prompt_id = Arc::clone(&self.prompt_id);
        let data = self.live.clone();
        let form = data.clone();
        let handle = tokio::spawn(async move {
            persistence.persist_form(&prompt_id, &form, dirty).await
        });
        self.in_flight = Some(InFlight {
            handle,
            data,
            waiters,
        });
        self.publish();
    }

    fn finish_save(&mut self, joined: Result<RepositoryResult<()>, JoinError>, follow_up: bool) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let edited_while_saving = self.live != in_flight.data;
        let result = match joined {
            Ok(result) => result.map_err(AutosaveError::from),
            Err(err) => Err(AutosaveError::Persistence(format!("save task failed: {err}"))),
        };

        match result {
            Ok(()) => {
                self.saved = in_flight.data;
                self.last_saved_at = Some(now_millis());
                self.last_error = None;
                self.saves_completed += 1;
                for waiter in in_flight.waiters {
                    let _ = waiter.send(Ok(SaveOutcome::Saved));
                }
            }
            Err(err) => {
                warn!("Autosave failed for prompt {}: {}", self.prompt_id, err);
                self.last_error = Some(err.clone());
                for waiter in in_flight.waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }

        let queued = std::mem::take(&mut self.queued_saves);
        if !follow_up {
            for waiter in queued {
                let _ = waiter.send(Err(AutosaveError::Closed));
            }
            self.publish();
            return;
        }

        if !queued.is_empty() {
            self.debounce_deadline = None;
            self.start_save(queued);
        } else if self.live.diff(&self.saved).is_empty() {
            self.debounce_deadline = None;
            self.publish();
        } else if edited_while_saving {
            // Start a fresh quiet period for the newer edits
            self.debounce_deadline = Some(Instant::now() + self.settings.debounce);
            self.publish();
        } else {
            // Failed with no newer edits; the next edit or manual save retries
            self.publish();
        }
    }

    async fn flush_checkpoint(&mut self) {
        let Some(run) = self.pending_checkpoint.take() else {
            return;
        };
        if let Err(err) = self.write_run(&run).await {
            warn!("Checkpoint for prompt {} not saved: {}", self.prompt_id, err);
            if self.pending_checkpoint.is_none() {
                self.pending_checkpoint = Some(run);
            }
        }
    }

    async fn write_run(&mut self, run: &SavedRun) -> Result<(), AutosaveError> {
        // Serialize with any running form save
        if self.in_flight.is_some() {
            let joined = join_in_flight(&mut self.in_flight).await;
            self.finish_save(joined, true);
        }
        match self.persistence.persist_run(&self.prompt_id, run).await {
            Ok(()) => {
                debug!(
                    "Run {} of prompt {} saved ({} bytes, completed: {})",
                    run.id,
                    self.prompt_id,
                    run.output.len(),
                    run.completed
                );
                Ok(())
            }
            Err(err) => {
                let err = AutosaveError::from(err);
                self.last_error = Some(err.clone());
                self.publish();
                Err(err)
            }
        }
    }

    async fn teardown(&mut self) {
        self.debounce_deadline = None;
        self.checkpoint_deadline = None;
        self.pending_checkpoint = None;
        if self.in_flight.is_some() {
            let joined = join_in_flight(&mut self.in_flight).await;
            self.finish_save(joined, false);
        }
        if !self.live.diff(&self.saved).is_empty() {
            info!(
                "Closing session for prompt {} with unsaved changes",
                self.prompt_id
            );
        }
    }

    fn publish(&self) {
        let dirty_fields = self.live.diff(&self.saved);
        let phase = if self.in_flight.is_some() {
            SavePhase::Saving
        } else if dirty_fields.is_empty() {
            SavePhase::Clean
        } else {
            SavePhase::Dirty
        };
        self.status_tx.send_replace(AutosaveStatus {
            phase,
            dirty_fields,
            last_saved_at: self.last_saved_at,
            last_error: self.last_error.clone(),
            notice: self.notice.clone(),
            saves_completed: self.saves_completed,
        });
    }
}

async fn join_in_flight(
    in_flight: &mut Option<InFlight>,
) -> Result<RepositoryResult<()>, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}
