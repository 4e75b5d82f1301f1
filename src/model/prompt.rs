//! Prompt records and their attached state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maximum number of history snapshots kept per prompt
pub const MAX_HISTORY: usize = 10;

/// Maximum number of saved runs kept per prompt
pub const MAX_SAVED_RUNS: usize = 50;

/// Category assigned when none is given
pub const DEFAULT_CATEGORY: &str = "General";

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a new opaque prompt id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// How an example feeds the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExampleMode {
    /// Independent input/output pair
    #[default]
    Standard,
    /// Refinement step building on a previous output
    Iterative,
}

/// Few-shot example attached to a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub mode: ExampleMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<String>,
}

impl Example {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            mode: ExampleMode::Standard,
            iteration_index: None,
            previous_output: None,
        }
    }
}

/// Model and sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    2048
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            top_p: None,
            top_k: None,
        }
    }
}

/// Snapshot of the substantive fields of a prompt before an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVersion {
    pub id: String,
    pub timestamp: i64,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PromptConfig>,
}

/// One model invocation and its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRun {
    pub id: String,
    pub timestamp: i64,
    pub model: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub variable_values: BTreeMap<String, String>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    /// Partial output that a later generation may resume from
    #[serde(default)]
    pub is_checkpoint: bool,
    #[serde(default)]
    pub completed: bool,
}

impl SavedRun {
    /// Start a new, empty run for `model`
    pub fn start(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            timestamp: now_millis(),
            model: model.into(),
            input: input.into(),
            variable_values: BTreeMap::new(),
            output: String::new(),
            rating: None,
            is_checkpoint: false,
            completed: false,
        }
    }
}

/// The central entity of the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_zh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_zh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Example>,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<i64>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PromptConfig>,
    #[serde(default)]
    pub history: Vec<PromptVersion>,
    #[serde(default)]
    pub saved_runs: Vec<SavedRun>,
    #[serde(default)]
    pub last_variable_values: BTreeMap<String, String>,
}

impl Prompt {
    /// Create a prompt with a fresh id and timestamps
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            title: title.into(),
            description: String::new(),
            content: content.into(),
            title_en: None,
            content_en: None,
            title_zh: None,
            content_zh: None,
            system_instruction: None,
            examples: Vec::new(),
            category: DEFAULT_CATEGORY.to_string(),
            tags: Vec::new(),
            secondary_tags: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            collected_at: None,
            is_favorite: false,
            config: None,
            history: Vec::new(),
            saved_runs: Vec::new(),
            last_variable_values: BTreeMap::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `other` differs in a field that warrants a history snapshot
    pub fn differs_substantively(&self, other: &Prompt) -> bool {
        self.content != other.content
            || self.system_instruction != other.system_instruction
            || self.config != other.config
            || self.examples != other.examples
    }

    /// Capture the substantive fields as they are now
    pub fn to_version(&self, timestamp: i64) -> PromptVersion {
        PromptVersion {
            id: new_id(),
            timestamp,
            title: self.title.clone(),
            content: self.content.clone(),
            system_instruction: self.system_instruction.clone(),
            examples: self.examples.clone(),
            config: self.config.clone(),
        }
    }

    /// Prepend a history snapshot, keeping the newest `max`
    pub fn push_history(&mut self, version: PromptVersion, max: usize) {
        self.history.insert(0, version);
        self.history.truncate(max);
    }

    /// Prepend a run, keeping the newest `max` and at most one checkpoint.
    ///
    /// A run whose id is already present replaces that entry, so a checkpoint
    /// that progresses or completes never leaves stale copies behind.
    pub fn push_run(&mut self, run: SavedRun, max: usize) {
        self.saved_runs.retain(|existing| existing.id != run.id);
        if run.is_checkpoint {
            for existing in &mut self.saved_runs {
                existing.is_checkpoint = false;
            }
        }
        self.saved_runs.insert(0, run);
        self.saved_runs.truncate(max);
    }

    /// The run a resumed generation would continue from
    pub fn active_checkpoint(&self) -> Option<&SavedRun> {
        self.saved_runs.iter().find(|run| run.is_checkpoint)
    }
}

/// Normalize a tag list: trimmed, non-empty, de-duplicated and sorted
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: &str, checkpoint: bool) -> SavedRun {
        SavedRun {
            id: id.to_string(),
            is_checkpoint: checkpoint,
            ..SavedRun::start("model", "input")
        }
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let mut prompt = Prompt::new("t", "v0");
        for i in 1..=15 {
            let snapshot = prompt.to_version(i);
            prompt.content = format!("v{i}");
            prompt.push_history(snapshot, MAX_HISTORY);
        }
        assert_eq!(prompt.history.len(), MAX_HISTORY);
        assert_eq!(prompt.history[0].content, "v14");
        assert_eq!(prompt.history[9].content, "v5");
    }

    #[test]
    fn test_substantive_change_ignores_cosmetics() {
        let original = Prompt::new("Title", "Body");
        let mut cosmetic = original.clone();
        cosmetic.title = "Other".to_string();
        cosmetic.tags = vec!["x".to_string()];
        cosmetic.category = "Writing".to_string();
        assert!(!original.differs_substantively(&cosmetic));

        let mut examples = original.clone();
        examples.examples.push(Example::new("in", "out"));
        assert!(original.differs_substantively(&examples));
    }

    #[test]
    fn test_single_active_checkpoint() {
        let mut prompt = Prompt::new("t", "c");
        prompt.push_run(run("a", true), MAX_SAVED_RUNS);
        prompt.push_run(run("b", true), MAX_SAVED_RUNS);
        assert_eq!(prompt.saved_runs.len(), 2);
        assert_eq!(prompt.active_checkpoint().map(|r| r.id.as_str()), Some("b"));
        assert_eq!(
            prompt.saved_runs.iter().filter(|r| r.is_checkpoint).count(),
            1
        );
    }

    #[test]
    fn test_run_with_same_id_replaces_entry() {
        let mut prompt = Prompt::new("t", "c");
        prompt.push_run(run("a", true), MAX_SAVED_RUNS);
        let mut finished = run("a", false);
        finished.completed = true;
        prompt.push_run(finished, MAX_SAVED_RUNS);
        assert_eq!(prompt.saved_runs.len(), 1);
        assert!(prompt.active_checkpoint().is_none());
    }

    #[test]
    fn test_saved_runs_bounded() {
        let mut prompt = Prompt::new("t", "c");
        for i in 0..60 {
            prompt.push_run(run(&format!("r{i}"), false), MAX_SAVED_RUNS);
        }
        assert_eq!(prompt.saved_runs.len(), MAX_SAVED_RUNS);
        assert_eq!(prompt.saved_runs[0].id, "r59");
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(
            normalize_tags([" b", "a", "", "b", "a "]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let prompt = Prompt::new("t", "c");
        let value = serde_json::to_value(&prompt).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("savedRuns").is_some());
        assert!(value.get("deletedAt").is_none());
    }
}
