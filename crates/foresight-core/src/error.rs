//! Error types for Foresight Core.

use crate::storage::StorageError;
use foresight_orchestrator::OrchestratorError;
use thiserror::Error;

/// Core error type for Foresight operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration could not be rendered
    #[error("Configuration error: {0}")]
    Render(#[from] toml::ser::Error),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Orchestrator could not be assembled
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Result type alias for Foresight Core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
