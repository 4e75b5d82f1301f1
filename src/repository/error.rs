//! Error types for the prompt repository

use thiserror::Error;

use crate::storage::StorageError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Prompt not found: {0}")]
    NotFound(String),

    #[error("Prompt already exists: {0}")]
    DuplicateId(String),

    #[error("Version {version} not found in history of prompt {id}")]
    VersionNotFound { id: String, version: String },

    #[error("Invalid prompt data: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Storage(err) => err.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.into())
    }
}
