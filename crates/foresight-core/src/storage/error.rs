//! Error types for the storage layer.

use foresight_orchestrator::StoreError;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(e) => StoreError::Serialization(e),
            StorageError::Connection(rusqlite::Error::InvalidColumnType(_, column, _)) => {
                StoreError::Corrupt(format!("unreadable {column} column"))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}
