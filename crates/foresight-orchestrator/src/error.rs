// Error types for training orchestration

use foresight_training::{SessionId, TrainingError, TrainingStatus};
use thiserror::Error;

use crate::store::StoreError;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The job specification was rejected before any record was created
    #[error("Invalid job specification: {0}")]
    Validation(#[source] TrainingError),

    /// Admission denied; the caller may retry later
    #[error("Training capacity reached ({active}/{ceiling} sessions in progress)")]
    Capacity {
        /// Sessions currently in progress
        active: usize,
        /// Configured ceiling
        ceiling: usize,
    },

    /// The session id already belongs to a session past PENDING
    #[error("Training session {session_id} is already {status}")]
    AlreadyStarted {
        /// Session id
        session_id: SessionId,
        /// Its current status
        status: TrainingStatus,
    },

    /// Job record store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The worker could not be scheduled
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl OrchestratorError {
    /// Capacity errors are the only ones worth retrying unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}
