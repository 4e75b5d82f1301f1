use thiserror::Error;

use crate::repository::RepositoryError;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("SQL error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Only read-only statements are allowed in the SQL console")]
    WriteForbidden,

    #[error("Mirror connection lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
