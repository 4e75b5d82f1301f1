use super::*;
use crate::diagnostics::ScriptedRunner;
use crate::events::ChangeEventBus;
use crate::model::Prompt;
use crate::repository::RepositoryError;
use crate::runner::{RunConfig, RunnerError};
use crate::storage::backends::{MemoryDocumentStore, MemoryKeyValueStore};
use crate::storage::schema::upgrade_app_schema;
use crate::storage::{DocumentStore, KeyValueStore, StorageError, StorageMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Persistence double that records every write with its (virtual) time
#[derive(Default)]
struct RecordingPersistence {
    forms: Mutex<Vec<(Instant, FormSnapshot, DirtyFields)>>,
    runs: Mutex<Vec<SavedRun>>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
}

impl RecordingPersistence {
    fn with_delay(delay: Duration) -> Self {
        let persistence = Self::default();
        *persistence.delay.lock().unwrap() = Some(delay);
        persistence
    }

    fn forms(&self) -> Vec<(Instant, FormSnapshot, DirtyFields)> {
        self.forms.lock().unwrap().clone()
    }

    fn runs(&self) -> Vec<SavedRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionPersistence for RecordingPersistence {
    async fn persist_form(
        &self,
        _prompt_id: &str,
        form: &FormSnapshot,
        dirty: DirtyFields,
    ) -> RepositoryResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage(StorageError::unavailable("disk gone")));
        }
        self.forms
            .lock()
            .unwrap()
            .push((Instant::now(), form.clone(), dirty));
        Ok(())
    }

    async fn persist_run(&self, _prompt_id: &str, run: &SavedRun) -> RepositoryResult<()> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }
}

fn initial() -> FormSnapshot {
    FormSnapshot::from_prompt(&Prompt::new("Summarize", "Summarize {{text}}"))
}

fn with_content(content: &str) -> FormSnapshot {
    FormSnapshot {
        content: content.to_string(),
        ..initial()
    }
}

fn session(persistence: &Arc<RecordingPersistence>) -> AutosaveHandle {
    let persistence: Arc<dyn SessionPersistence> = persistence.clone();
    AutosaveController::spawn("p1", persistence, initial(), AutosaveSettings::default())
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_rapid_edits() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);
    let start = Instant::now();

    for text in ["a", "ab", "abc"] {
        handle.edit(with_content(text)).unwrap();
        sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(handle.status().phase, SavePhase::Dirty);
    assert!(handle.status().dirty_fields.contains(DirtyFields::CONTENT));

    // Last edit at 400ms; the save is due at 1900ms
    sleep(Duration::from_millis(1250)).await;
    assert!(persistence.forms().is_empty());

    sleep(Duration::from_millis(100)).await;
    let forms = persistence.forms();
    assert_eq!(forms.len(), 1);
    let elapsed = forms[0].0 - start;
    assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1950), "{elapsed:?}");
    assert_eq!(forms[0].1.content, "abc");
    assert_eq!(forms[0].2, DirtyFields::CONTENT);

    let status = handle.status();
    assert_eq!(status.phase, SavePhase::Clean);
    assert_eq!(status.saves_completed, 1);
    assert!(status.last_saved_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_identical_edit_is_not_dirty() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);

    handle.edit(initial()).unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.status().phase, SavePhase::Clean);
    assert!(persistence.forms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_save_triggers_second_save() {
    let persistence = Arc::new(RecordingPersistence::with_delay(Duration::from_secs(1)));
    let handle = session(&persistence);

    handle.edit(with_content("first")).unwrap();
    sleep(Duration::from_millis(1600)).await;
    assert_eq!(handle.status().phase, SavePhase::Saving);

    handle.edit(with_content("second")).unwrap();
    // First save lands at 2500ms
    sleep(Duration::from_millis(1000)).await;
    let status = handle.status();
    assert_eq!(status.phase, SavePhase::Dirty);
    assert_eq!(status.saves_completed, 1);
    assert_eq!(persistence.forms()[0].1.content, "first");

    // Fresh debounce from 2500ms, second save lands at 5000ms
    sleep(Duration::from_millis(2500)).await;
    let forms = persistence.forms();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[1].1.content, "second");
    assert_eq!(handle.status().phase, SavePhase::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_runs_immediately() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);

    assert_eq!(handle.save_now().await.unwrap(), SaveOutcome::NothingToSave);

    handle.edit(with_content("typed")).unwrap();
    assert_eq!(handle.save_now().await.unwrap(), SaveOutcome::Saved);
    assert_eq!(persistence.forms().len(), 1);

    // The cancelled debounce never fires a second save
    sleep(Duration::from_secs(5)).await;
    assert_eq!(persistence.forms().len(), 1);
    assert_eq!(handle.status().phase, SavePhase::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_waits_for_in_flight_save() {
    let persistence = Arc::new(RecordingPersistence::with_delay(Duration::from_secs(1)));
    let handle = session(&persistence);

    handle.edit(with_content("first")).unwrap();
    sleep(Duration::from_millis(1600)).await;
    handle.edit(with_content("second")).unwrap();

    assert_eq!(handle.save_now().await.unwrap(), SaveOutcome::Saved);
    let forms = persistence.forms();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[1].1.content, "second");
    assert_eq!(handle.status().phase, SavePhase::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_stays_dirty_until_retried() {
    let persistence = Arc::new(RecordingPersistence::default());
    persistence.failing.store(true, Ordering::SeqCst);
    let handle = session(&persistence);

    handle.edit(with_content("draft")).unwrap();
    sleep(Duration::from_secs(2)).await;
    let status = handle.status();
    assert_eq!(status.phase, SavePhase::Dirty);
    assert!(matches!(status.last_error, Some(AutosaveError::Persistence(_))));

    // No automatic retry
    sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.status().saves_completed, 0);

    persistence.failing.store(false, Ordering::SeqCst);
    assert_eq!(handle.save_now().await.unwrap(), SaveOutcome::Saved);
    let status = handle.status();
    assert_eq!(status.phase, SavePhase::Clean);
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_anomalous_edit_is_recovered() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);

    let partial = FormState {
        content: Some("Rewritten body".to_string()),
        ..FormState::default()
    };
    handle.edit(partial).unwrap();
    assert_eq!(handle.save_now().await.unwrap(), SaveOutcome::Saved);

    let saved = persistence.forms()[0].1.clone();
    assert_eq!(saved.title, "Summarize");
    assert_eq!(saved.content, "Rewritten body");
    assert_eq!(saved.category, initial().category);
    let notice = handle.status().notice.unwrap();
    assert!(notice.contains("title"), "{notice}");
}

#[tokio::test(start_paused = true)]
async fn test_checkpoints_are_throttled() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);
    let mut run = SavedRun::start("gemini-2.5-flash", "text");

    for chunk in ["one ", "two ", "three"] {
        run.output.push_str(chunk);
        handle.checkpoint(run.clone()).unwrap();
        sleep(Duration::from_secs(1)).await;
    }
    assert!(persistence.runs().is_empty());

    sleep(Duration::from_secs(3)).await;
    let runs = persistence.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].output, "one two three");
    assert!(runs[0].is_checkpoint);
    assert!(!runs[0].completed);

    handle.complete_run(run.clone()).await.unwrap();
    let runs = persistence.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs[1].completed);
    assert!(!runs[1].is_checkpoint);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_save() {
    let persistence = Arc::new(RecordingPersistence::default());
    let handle = session(&persistence);

    handle.edit(with_content("never saved")).unwrap();
    handle.shutdown().await;
    sleep(Duration::from_secs(5)).await;

    assert!(persistence.forms().is_empty());
    assert_eq!(
        handle.edit(with_content("late")).unwrap_err(),
        AutosaveError::Closed
    );
    assert_eq!(handle.save_now().await.unwrap_err(), AutosaveError::Closed);
}

// ----------------------------------------------------------------------
// Against the real repository
// ----------------------------------------------------------------------

async fn repository_with_prompt() -> (Arc<PromptRepository>, Prompt) {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
    let docs: Arc<dyn DocumentStore> =
        Arc::new(MemoryDocumentStore::open("test", 2, &upgrade_app_schema).unwrap());
    let repo = Arc::new(PromptRepository::new(
        kv,
        Some(docs),
        StorageMode::Document,
        Arc::new(ChangeEventBus::new()),
    ));
    let prompt = repo
        .create(Prompt::new("Translate", "Translate {{text}}"))
        .await
        .unwrap();
    (repo, prompt)
}

#[tokio::test(start_paused = true)]
async fn test_start_unknown_prompt_fails() {
    let (repo, _) = repository_with_prompt().await;
    let err = AutosaveController::start(repo, "missing", AutosaveSettings::default())
        .await
        .unwrap_err();
    assert_eq!(err, AutosaveError::NotFound("missing".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_form_save_and_run_do_not_clobber_each_other() {
    let (repo, prompt) = repository_with_prompt().await;
    let handle = AutosaveController::start(repo.clone(), &prompt.id, AutosaveSettings::default())
        .await
        .unwrap();

    let mut form = FormSnapshot::from_prompt(&prompt);
    form.title = "Translate to French".to_string();
    handle.edit(form).unwrap();
    let mut run = SavedRun::start("gemini-2.5-flash", "bonjour");
    run.output = "partial".to_string();
    handle.checkpoint(run.clone()).unwrap();

    sleep(Duration::from_secs(6)).await;
    let stored = repo.get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Translate to French");
    assert_eq!(stored.content, prompt.content);
    assert_eq!(stored.saved_runs.len(), 1);
    assert_eq!(stored.active_checkpoint().unwrap().output, "partial");
}

#[tokio::test(start_paused = true)]
async fn test_stream_checkpointer_finalizes_run() {
    let (repo, prompt) = repository_with_prompt().await;
    let handle = AutosaveController::start(repo.clone(), &prompt.id, AutosaveSettings::default())
        .await
        .unwrap();
    let runner = Arc::new(
        ScriptedRunner::new(["Bon", "jour", " le", " monde"]).with_delay(Duration::from_secs(2)),
    );
    let checkpointer = StreamCheckpointer::new(runner.clone(), handle.clone());

    let run = checkpointer
        .run(
            "Translate hello world",
            &RunConfig::default(),
            SavedRun::start("gemini-2.5-flash", "hello world"),
        )
        .await
        .unwrap();
    assert_eq!(run.output, "Bonjour le monde");
    assert_eq!(runner.calls(), 1);

    let stored = repo.get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.saved_runs.len(), 1);
    assert!(stored.saved_runs[0].completed);
    assert!(stored.active_checkpoint().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_stream_is_never_completed() {
    let (repo, prompt) = repository_with_prompt().await;
    let handle = AutosaveController::start(repo.clone(), &prompt.id, AutosaveSettings::default())
        .await
        .unwrap();
    let runner =
        Arc::new(ScriptedRunner::new(["a", "b", "c", "d"]).with_delay(Duration::from_secs(2)));
    let checkpointer = StreamCheckpointer::new(runner, handle.clone());
    let cancel = CancellationToken::new();
    let config = RunConfig::default().with_cancel(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });
    let err = checkpointer
        .run("text", &config, SavedRun::start("gemini-2.5-flash", "text"))
        .await
        .unwrap_err();
    assert_eq!(err, AutosaveError::Run(RunnerError::Cancelled));

    // The partial output is kept as a checkpoint once the interval elapses
    sleep(Duration::from_secs(5)).await;
    let stored = repo.get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.saved_runs.len(), 1);
    assert!(!stored.saved_runs[0].completed);
    assert_eq!(stored.saved_runs[0].output, "ab");
}

#[tokio::test(start_paused = true)]
async fn test_stream_timeout() {
    let (repo, prompt) = repository_with_prompt().await;
    let handle = AutosaveController::start(repo, &prompt.id, AutosaveSettings::default())
        .await
        .unwrap();
    let runner = Arc::new(ScriptedRunner::new(["slow"]).with_delay(Duration::from_secs(60)));
    let checkpointer = StreamCheckpointer::new(runner, handle);
    let config = RunConfig::default().with_timeout(Duration::from_secs(10));

    let err = checkpointer
        .run("text", &config, SavedRun::start("gemini-2.5-flash", "text"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AutosaveError::Run(RunnerError::Timeout(Duration::from_secs(10)))
    );
}
