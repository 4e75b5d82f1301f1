//! Persistence of directory handle capability tokens used for native file saves.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{StorageError, StorageResult};
use super::schema::{DEFAULT_DIRECTORY_HANDLE, DIRECTORY_HANDLES_STORE};
use super::traits::DocumentStore;

/// Opaque grant to write into a user-chosen directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryHandle {
    /// Display name of the directory
    pub name: String,
    /// Capability token issued by the host platform
    pub token: String,
    pub granted_at: i64,
}

/// Reads and writes the default directory handle.
///
/// Handles only live in the document store; without one every call reports
/// the store as unavailable.
pub struct DirectoryHandles {
    documents: Option<Arc<dyn DocumentStore>>,
}

impl DirectoryHandles {
    pub fn new(documents: Option<Arc<dyn DocumentStore>>) -> Self {
        Self { documents }
    }

    fn store(&self) -> StorageResult<&Arc<dyn DocumentStore>> {
        self.documents
            .as_ref()
            .ok_or_else(|| StorageError::unavailable("document store is not open"))
    }

    pub async fn save(&self, handle: &DirectoryHandle) -> StorageResult<()> {
        self.store()?
            .put(
                DIRECTORY_HANDLES_STORE,
                DEFAULT_DIRECTORY_HANDLE,
                serde_json::to_value(handle)?,
            )
            .await
    }

    pub async fn load(&self) -> StorageResult<Option<DirectoryHandle>> {
        let value = self
            .store()?
            .get(DIRECTORY_HANDLES_STORE, DEFAULT_DIRECTORY_HANDLE)
            .await?;
        value
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.store()?
            .delete(DIRECTORY_HANDLES_STORE, DEFAULT_DIRECTORY_HANDLE)
            .await
    }
}
