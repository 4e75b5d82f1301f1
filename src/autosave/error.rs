use thiserror::Error;

use crate::repository::RepositoryError;
use crate::runner::RunnerError;

/// Errors reported by an editing session.
///
/// Cloned into every status update, so storage errors are kept as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutosaveError {
    #[error("Prompt not found: {0}")]
    NotFound(String),

    #[error("Unsaved changes: {0}")]
    Persistence(String),

    #[error("Editing session closed")]
    Closed,

    #[error(transparent)]
    Run(#[from] RunnerError),
}

impl From<RepositoryError> for AutosaveError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Persistence(other.to_string()),
        }
    }
}
