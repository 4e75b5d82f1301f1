//! # Prompt Vault
//!
//! Local-first storage core for a personal prompt library.
//!
//! ## Modules
//!
//! - `storage` - Key-value and versioned document store capabilities with memory and file backends
//! - `model` - Prompt records, editor form snapshots, settings and sanitization of untrusted JSON
//! - `events` - Synchronous change-event bus fanning out prompt mutations
//! - `repository` - The single write path for prompts, categories and settings
//! - `migration` - One-shot legacy migration, export/import bundles and factory reset
//! - `analytics` - Embedded SQL mirror of the prompt store plus the console's CRUD passthrough
//! - `autosave` - Debounced, race-guarded autosave state machine for an editing session
//! - `runner` - The LLM runner capability consumed by streaming checkpoints
//! - `config` - Application configuration loading
//! - `app` - Wiring of all of the above into a bootstrapped application
pub mod analytics;
pub mod app;
pub mod autosave;
pub mod config;
pub mod events;
pub mod migration;
pub mod model;
pub mod repository;
pub mod runner;
pub mod storage;

#[cfg(any(test, feature = "diagnostics"))]
pub mod diagnostics;

pub use app::{Analytics, App};
pub use config::AppConfig;
pub use events::{ChangeEvent, ChangeEventBus};
pub use model::{FormSnapshot, Prompt};
pub use repository::PromptRepository;
