//! Application configuration.
//!
//! Sources are applied in order: built-in defaults, then an optional TOML
//! file, then `PROMPT_VAULT_*` environment variables.
//!
//! ```toml
//! [storage]
//! backend = "file"
//! data_dir = "~/.prompt-vault"
//!
//! [autosave]
//! debounce = "1500ms"
//! checkpoint_interval = "5s"
//!
//! [limits]
//! max_history = 10
//!
//! [analytics]
//! allow_raw_writes = false
//! ```


use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::analytics::AnalyticsOptions;
use crate::autosave::AutosaveSettings;
use crate::model::{MAX_HISTORY, MAX_SAVED_RUNS};
use crate::repository::RepositoryLimits;
use crate::storage::{BackendType, StorageConfig};

pub const ENV_DATA_DIR: &str = "PROMPT_VAULT_DATA_DIR";
pub const ENV_BACKEND: &str = "PROMPT_VAULT_BACKEND";
pub const ENV_AUTOSAVE_DEBOUNCE_MS: &str = "PROMPT_VAULT_AUTOSAVE_DEBOUNCE_MS";
pub const ENV_ALLOW_RAW_SQL: &str = "PROMPT_VAULT_ALLOW_RAW_SQL";

/// File name of the SQL mirror inside the data directory
pub const ANALYTICS_DB_FILE: &str = "analytics.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_saved_runs")]
    pub max_saved_runs: usize,
    #[serde(default = "default_max_query_history")]
    pub max_query_history: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_saved_runs: default_max_saved_runs(),
            max_query_history: default_max_query_history(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Maintain the SQL mirror at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub allow_raw_writes: bool,
    /// Mirror location; defaults to the data directory for file storage
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_raw_writes: false,
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub autosave: AutosaveSettings,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl AppConfig {
    /// Ephemeral configuration: memory storage, in-memory mirror
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::memory(),
            ..Self::default()
        }
    }

    /// Load from `path` (if any) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load from `path` (if any), reading overrides through `lookup`
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.merge_env_vars(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PROMPT_VAULT_*` overrides
    pub fn merge_env_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.storage.base_dir = PathBuf::from(dir);
        }

        if let Some(backend) = lookup(ENV_BACKEND) {
            self.storage.backend = backend
                .parse::<BackendType>()
                .map_err(|e| ConfigError::Invalid(format!("{ENV_BACKEND}: {e}")))?;
        }

        if let Some(ms) = lookup(ENV_AUTOSAVE_DEBOUNCE_MS) {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid(format!("{ENV_AUTOSAVE_DEBOUNCE_MS}: {e}"))
            })?;
            self.autosave.debounce = Duration::from_millis(ms);
        }

        if let Some(flag) = lookup(ENV_ALLOW_RAW_SQL) {
            self.analytics.allow_raw_writes = parse_flag(&flag)
                .ok_or_else(|| ConfigError::Invalid(format!("{ENV_ALLOW_RAW_SQL}: '{flag}'")))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave.debounce.is_zero() {
            return Err(ConfigError::Invalid("autosave.debounce must be positive".into()));
        }
        if self.autosave.checkpoint_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "autosave.checkpoint_interval must be positive".into(),
            ));
        }
        if self.limits.max_history == 0 || self.limits.max_saved_runs == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_history and limits.max_saved_runs must be at least 1".into(),
            ));
        }
        if self.storage.kv_quota_bytes == 0 {
            return Err(ConfigError::Invalid("storage.kv_quota_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn repository_limits(&self) -> RepositoryLimits {
        RepositoryLimits {
            max_history: self.limits.max_history,
            max_saved_runs: self.limits.max_saved_runs,
        }
    }

    pub fn analytics_options(&self) -> AnalyticsOptions {
        AnalyticsOptions {
            allow_raw_writes: self.analytics.allow_raw_writes,
            max_query_history: self.limits.max_query_history,
        }
    }

    /// Where the SQL mirror lives. `None` means in memory.
    pub fn analytics_database_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.analytics.database_path {
            return Some(path.clone());
        }
        match self.storage.backend {
            BackendType::File => Some(self.storage.base_dir.join(ANALYTICS_DB_FILE)),
            BackendType::Memory => None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_max_history() -> usize {
    MAX_HISTORY
}

fn default_max_saved_runs() -> usize {
    MAX_SAVED_RUNS
}

fn default_max_query_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}
