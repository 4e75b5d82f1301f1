//! Editing sessions opened through the app, on in-memory storage with paused time

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use prompt_vault::autosave::{AutosaveError, SavePhase, SaveOutcome, StreamCheckpointer};
use prompt_vault::model::SavedRun;
use prompt_vault::runner::{OutputStream, PromptRunner, RunConfig, RunnerError};
use prompt_vault::{App, AppConfig, FormSnapshot, Prompt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Streams a fixed list of chunks
struct CannedRunner {
    chunks: Vec<String>,
}

impl CannedRunner {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PromptRunner for CannedRunner {
    async fn run_stream(
        &self,
        _prompt_text: &str,
        _config: &RunConfig,
    ) -> Result<OutputStream, RunnerError> {
        Ok(stream::iter(self.chunks.clone().into_iter().map(Ok)).boxed())
    }
}

async fn app_with_prompt() -> (App, Prompt) {
    let mut config = AppConfig::in_memory();
    config.autosave.debounce = Duration::from_millis(500);
    let app = App::bootstrap(config).await.unwrap();
    let prompt = app
        .repository()
        .create(Prompt::new("Summarize", "Summarize {{text}}"))
        .await
        .unwrap();
    (app, prompt)
}

#[tokio::test(start_paused = true)]
async fn test_typing_burst_saves_once() {
    let (app, prompt) = app_with_prompt().await;
    let editor = app.open_editor(&prompt.id).await.unwrap();

    let mut form = FormSnapshot::from_prompt(&prompt);
    for content in ["S", "Sh", "Sho", "Shorten {{text}}"] {
        form.content = content.to_string();
        editor.edit(form.clone()).unwrap();
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(editor.status().phase, SavePhase::Dirty);

    sleep(Duration::from_millis(600)).await;
    let status = editor.status();
    assert_eq!(status.phase, SavePhase::Clean);
    assert_eq!(status.saves_completed, 1);
    assert!(status.last_saved_at.is_some());

    let stored = app.repository().get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "Shorten {{text}}");
    assert_eq!(stored.history.len(), 1);
    assert_eq!(stored.history[0].content, "Summarize {{text}}");
}

#[tokio::test(start_paused = true)]
async fn test_saved_form_reaches_the_sql_mirror() {
    let (app, prompt) = app_with_prompt().await;
    let editor = app.open_editor(&prompt.id).await.unwrap();

    let mut form = FormSnapshot::from_prompt(&prompt);
    form.title = "Summarize (short)".to_string();
    editor.edit(form).unwrap();
    assert_eq!(editor.save_now().await.unwrap(), SaveOutcome::Saved);
    assert_eq!(editor.save_now().await.unwrap(), SaveOutcome::NothingToSave);

    let adapter = app.analytics().require().unwrap();
    let result = adapter
        .execute_sql("SELECT title FROM prompts")
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!("Summarize (short)")]]);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_run_and_form_edits_both_survive() {
    let (app, prompt) = app_with_prompt().await;
    let editor = app.open_editor(&prompt.id).await.unwrap();

    let mut form = FormSnapshot::from_prompt(&prompt);
    form.content = "Summarize {{text}} in one line".to_string();
    editor.edit(form).unwrap();

    let runner: Arc<dyn PromptRunner> = Arc::new(CannedRunner::new(&["A short ", "summary."]));
    let checkpointer = StreamCheckpointer::new(runner, editor.clone());
    let run = checkpointer
        .run(
            "Summarize the report",
            &RunConfig::default(),
            SavedRun::start("gemini-2.5-flash", "the report"),
        )
        .await
        .unwrap();
    assert_eq!(run.output, "A short summary.");
    assert!(run.completed);

    sleep(Duration::from_secs(1)).await;
    let stored = app.repository().get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "Summarize {{text}} in one line");
    assert_eq!(stored.saved_runs.len(), 1);
    assert_eq!(stored.saved_runs[0].output, "A short summary.");
    assert!(stored.active_checkpoint().is_none());

    let adapter = app.analytics().require().unwrap();
    let result = adapter
        .execute_sql("SELECT saved_run_count FROM prompts")
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!(1)]]);
}

#[tokio::test(start_paused = true)]
async fn test_closed_session_rejects_edits() {
    let (app, prompt) = app_with_prompt().await;
    let editor = app.open_editor(&prompt.id).await.unwrap();

    let mut form = FormSnapshot::from_prompt(&prompt);
    form.content = "never saved".to_string();
    editor.edit(form.clone()).unwrap();
    editor.shutdown().await;

    assert_eq!(editor.edit(form), Err(AutosaveError::Closed));
    assert_eq!(editor.save_now().await, Err(AutosaveError::Closed));
    let stored = app.repository().get(&prompt.id).await.unwrap().unwrap();
    assert_eq!(stored.content, prompt.content);
}
