//! Model invocation seam.
//!
//! Provider HTTP clients live outside this crate; they plug in by
//! implementing [`PromptRunner`]. Output is streamed as text chunks.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::{Example, PromptConfig};

/// Stream of output chunks
pub type OutputStream = BoxStream<'static, Result<String, RunnerError>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// Parameters of one generation
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub system_instruction: Option<String>,
    pub examples: Vec<Example>,
    pub cancel: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

impl RunConfig {
    /// Run settings taken from a prompt's model configuration
    pub fn from_prompt_config(config: &PromptConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
pub trait PromptRunner: Send + Sync {
    /// Stream output chunks for `prompt_text`
    async fn run_stream(
        &self,
        prompt_text: &str,
        config: &RunConfig,
    ) -> Result<OutputStream, RunnerError>;

    /// Run to completion and return the full output
    async fn run(&self, prompt_text: &str, config: &RunConfig) -> Result<String, RunnerError> {
        let mut stream = self.run_stream(prompt_text, config).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ScriptedRunner;

    #[tokio::test]
    async fn test_run_collects_stream() {
        let runner = ScriptedRunner::new(["Hello", ", ", "world"]);
        let output = runner.run("hi", &RunConfig::default()).await.unwrap();
        assert_eq!(output, "Hello, world");
    }

    #[tokio::test]
    async fn test_run_surfaces_stream_errors() {
        let runner = ScriptedRunner::new(["partial"]).failing_with("rate limited");
        let err = runner.run("hi", &RunConfig::default()).await.unwrap_err();
        assert_eq!(err, RunnerError::Provider("rate limited".to_string()));
    }

    #[test]
    fn test_config_from_prompt() {
        let config = RunConfig::from_prompt_config(&PromptConfig::default())
            .with_timeout(Duration::from_secs(30));
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert!(config.cancel.is_none());
    }
}
