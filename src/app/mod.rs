//! Application wiring.
//!
//! [`App::bootstrap`] opens storage, runs the legacy migration to completion,
//! builds the repository on the resulting storage mode and attaches the SQL
//! mirror. Everything else in the crate is reached through the `App`.

pub mod error_handling;
pub mod logging;


pub use error_handling::handle_fatal_error;
pub use logging::init_logging;

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticalSyncAdapter, AnalyticsError};
use crate::autosave::{AutosaveController, AutosaveError, AutosaveHandle};
use crate::config::AppConfig;
use crate::events::{ChangeEventBus, LoggingObserver};
use crate::migration::{ExportBundle, ImportResult, MigrationEngine};
use crate::model::now_millis;
use crate::repository::{PromptRepository, RepositoryResult};
use crate::storage::{
    DirectoryHandle, DirectoryHandles, DocumentStore, StorageFactory, StorageMode, StorageResult,
};

/// State of the SQL mirror
pub enum Analytics {
    Available(Arc<AnalyticalSyncAdapter>),
    /// The mirror could not be opened or is disabled; the reason is kept for display
    Unavailable(String),
}

impl Analytics {
    pub fn adapter(&self) -> Option<&Arc<AnalyticalSyncAdapter>> {
        match self {
            Analytics::Available(adapter) => Some(adapter),
            Analytics::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Analytics::Available(_))
    }

    /// The adapter, or an error carrying the reason it is missing
    pub fn require(&self) -> Result<&Arc<AnalyticalSyncAdapter>> {
        match self {
            Analytics::Available(adapter) => Ok(adapter),
            Analytics::Unavailable(reason) => {
                Err(anyhow::anyhow!("SQL console unavailable: {reason}"))
            }
        }
    }
}

pub struct App {
    config: AppConfig,
    bus: Arc<ChangeEventBus>,
    migration: MigrationEngine,
    repository: Arc<PromptRepository>,
    analytics: Analytics,
    handles: DirectoryHandles,
}

impl App {
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let kv = StorageFactory::key_value_store(&config.storage)
            .context("Failed to open key-value storage")?;
        let documents = open_documents(&config).await;

        let migration = MigrationEngine::new(Arc::clone(&kv), documents.clone());
        let status = migration.initialize_storage_migration().await;
        let mode = migration.storage_mode();
        debug!(
            "Migration status: completed={} items={} errors={}",
            status.is_completed,
            status.migrated_items,
            status.errors.len()
        );

        let bus = Arc::new(ChangeEventBus::new());
        bus.subscribe(LoggingObserver);

        let repository = Arc::new(
            PromptRepository::new(kv, documents.clone(), mode, Arc::clone(&bus))
                .with_limits(config.repository_limits()),
        );

        let analytics = if config.analytics.enabled {
            open_analytics(&config, &repository).await
        } else {
            Analytics::Unavailable("disabled in configuration".to_string())
        };

        info!(
            "Prompt vault ready ({} storage, analytics {})",
            repository.mode(),
            if analytics.is_available() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            bus,
            migration,
            repository,
            analytics,
            handles: DirectoryHandles::new(documents),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<ChangeEventBus> {
        &self.bus
    }

    pub fn repository(&self) -> &Arc<PromptRepository> {
        &self.repository
    }

    pub fn migration(&self) -> &MigrationEngine {
        &self.migration
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.repository.mode()
    }

    /// Start an autosave session for an existing prompt
    pub async fn open_editor(&self, prompt_id: &str) -> Result<AutosaveHandle, AutosaveError> {
        AutosaveController::start(
            Arc::clone(&self.repository),
            prompt_id,
            self.config.autosave,
        )
        .await
    }

    pub async fn export(&self) -> RepositoryResult<ExportBundle> {
        self.migration.export_all_data(&self.repository).await
    }

    pub async fn import(&self, bundle: &Value) -> ImportResult {
        self.migration.import_data(&self.repository, bundle).await
    }

    /// Factory reset. The SQL mirror follows through deletion events.
    pub async fn reset(&self) -> RepositoryResult<()> {
        self.migration.clear_all_data(&self.repository).await
    }

    pub async fn save_directory_handle(
        &self,
        name: &str,
        token: &str,
    ) -> StorageResult<DirectoryHandle> {
        let handle = DirectoryHandle {
            name: name.to_string(),
            token: token.to_string(),
            granted_at: now_millis(),
        };
        self.handles.save(&handle).await?;
        Ok(handle)
    }

    pub async fn load_directory_handle(&self) -> StorageResult<Option<DirectoryHandle>> {
        self.handles.load().await
    }

    pub async fn clear_directory_handle(&self) -> StorageResult<()> {
        self.handles.clear().await
    }
}

async fn open_documents(config: &AppConfig) -> Option<Arc<dyn DocumentStore>> {
    match StorageFactory::open_document_store(&config.storage).await {
        Ok(documents) => Some(documents),
        Err(err) => {
            warn!(
                "Document store unavailable, continuing with key-value storage only: {}",
                err
            );
            None
        }
    }
}

async fn open_analytics(config: &AppConfig, repository: &Arc<PromptRepository>) -> Analytics {
    let path = config.analytics_database_path();
    let opened = async {
        let adapter = AnalyticalSyncAdapter::open(
            path.as_deref(),
            Arc::clone(repository),
            config.analytics_options(),
        )?;
        adapter.initialize_tables()?;
        adapter.resync().await?;
        adapter.start_sync();
        Ok::<_, AnalyticsError>(adapter)
    }
    .await;

    match opened {
        Ok(adapter) => Analytics::Available(Arc::new(adapter)),
        Err(err) => {
            warn!("SQL mirror unavailable: {}", err);
            Analytics::Unavailable(err.to_string())
        }
    }
}
