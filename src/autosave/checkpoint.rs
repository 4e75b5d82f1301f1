use futures::StreamExt;
use std::future;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::{AutosaveError, AutosaveHandle};
use crate::model::SavedRun;
use crate::runner::{PromptRunner, RunConfig, RunnerError};

/// Drives a streaming generation and keeps its partial output in `savedRuns`.
///
/// Every chunk is offered to the session as a checkpoint; the session decides
/// when to write. A finished run replaces its checkpoint. A cancelled, timed
/// out or failed run is left as a checkpoint and never marked completed.
pub struct StreamCheckpointer {
    runner: Arc<dyn PromptRunner>,
    session: AutosaveHandle,
}

impl StreamCheckpointer {
    pub fn new(runner: Arc<dyn PromptRunner>, session: AutosaveHandle) -> Self {
        Self { runner, session }
    }

    pub async fn run(
        &self,
        prompt_text: &str,
        config: &RunConfig,
        mut run: SavedRun,
    ) -> Result<SavedRun, AutosaveError> {
        let mut stream = self.runner.run_stream(prompt_text, config).await?;
        let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
        let cancel = config.cancel.clone();
        run.is_checkpoint = true;
        run.completed = false;

        loop {
            let cancelled = async {
                match &cancel {
                    Some(token) => token.cancelled().await,
                    None => future::pending().await,
                }
            };
            let timed_out = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancelled => {
                    info!("Generation for prompt {} cancelled", self.session.prompt_id());
                    return Err(RunnerError::Cancelled.into());
                }
                _ = timed_out => {
                    let timeout = config.timeout.unwrap_or_default();
                    warn!(
                        "Generation for prompt {} timed out after {:?}",
                        self.session.prompt_id(),
                        timeout
                    );
                    return Err(RunnerError::Timeout(timeout).into());
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        run.output.push_str(&text);
                        self.session.checkpoint(run.clone())?;
                    }
                    Some(Err(err)) => {
                        warn!(
                            "Generation for prompt {} failed: {}",
                            self.session.prompt_id(),
                            err
                        );
                        return Err(err.into());
                    }
                    None => break,
                },
            }
        }

        run.is_checkpoint = false;
        run.completed = true;
        self.session.complete_run(run.clone()).await?;
        debug!(
            "Generation {} for prompt {} completed with {} bytes",
            run.id,
            self.session.prompt_id(),
            run.output.len()
        );
        Ok(run)
    }
}
