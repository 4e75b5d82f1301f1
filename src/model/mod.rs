//! Domain model: prompts, editing-session snapshots and settings

pub mod form;
pub mod prompt;
pub mod sanitize;
pub mod seed;
pub mod settings;

pub use form::{DirtyFields, FormSnapshot, FormState, Resolution};
pub use prompt::{
    new_id, normalize_tags, now_millis, Example, ExampleMode, Prompt, PromptConfig,
    PromptVersion, SavedRun, DEFAULT_CATEGORY, MAX_HISTORY, MAX_SAVED_RUNS,
};
pub use sanitize::sanitize_prompt;
pub use seed::seed_prompts;
pub use settings::{default_categories, merge_categories, FilterState, Theme, DEFAULT_CATEGORIES};
