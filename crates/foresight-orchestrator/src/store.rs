//! Job record store.
//!
//! The store is the durable source of truth for session state. Every mutation is
//! a single atomic read-modify-write keyed by session id; the transition rules
//! themselves live on [`TrainingSession`].

use chrono::Utc;
use foresight_training::{
    EpochSnapshot, JobSpec, SessionId, TrainingMetrics, TrainingSession, TrainingStatus, Transition,
};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::locks::lock;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to execute an operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row holds data that cannot be interpreted.
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable representation of training sessions.
///
/// `update_*`, `complete` and `fail` against an unknown id return
/// [`Transition::Missing`] and log; they never error for that reason.
pub trait JobStore: Send + Sync {
    /// Returns the existing record for `session_id`, or creates a PENDING one.
    fn create(&self, session_id: &SessionId, spec: &JobSpec) -> StoreResult<TrainingSession>;

    /// Retrieves a record by id.
    fn get(&self, session_id: &SessionId) -> StoreResult<Option<TrainingSession>>;

    /// Moves a record along the lifecycle state machine.
    fn update_status(&self, session_id: &SessionId, status: TrainingStatus) -> StoreResult<Transition>;

    /// Records the latest epoch metrics of a running session.
    fn update_progress(&self, session_id: &SessionId, snapshot: &EpochSnapshot) -> StoreResult<Transition>;

    /// Refreshes `updated_at` of a running session so other processes can
    /// tell its worker is alive.
    fn touch(&self, session_id: &SessionId) -> StoreResult<Transition>;

    /// Writes final metrics and moves the record to COMPLETED.
    fn complete(&self, session_id: &SessionId, metrics: &TrainingMetrics) -> StoreResult<Transition>;

    /// Moves the record to FAILED and stores the reason.
    fn fail(&self, session_id: &SessionId, reason: &str) -> StoreResult<Transition>;

    /// Number of sessions currently IN_PROGRESS.
    fn count_active(&self) -> StoreResult<usize>;

    /// All sessions currently IN_PROGRESS.
    fn list_active(&self) -> StoreResult<Vec<TrainingSession>>;
}

/// Logs a mutation that targeted an unknown session.
pub fn note_missing(operation: &str, session_id: &SessionId) {
    warn!(session_id = %session_id, operation, "session_not_found_for_update");
}

/// Logs the outcome of a mutation at a level matching its severity.
pub fn note_transition(operation: &str, session_id: &SessionId, transition: Transition) {
    match transition {
        Transition::Applied { from } => {
            debug!(session_id = %session_id, operation, from = %from, "store_update_applied");
        }
        Transition::Unchanged => {
            debug!(session_id = %session_id, operation, "store_update_unchanged");
        }
        Transition::Rejected { current } => {
            warn!(session_id = %session_id, operation, current = %current, "store_update_rejected");
        }
        Transition::Missing => note_missing(operation, session_id),
    }
}

/// Process-local store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    sessions: Mutex<HashMap<SessionId, TrainingSession>>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn modify<F>(&self, operation: &str, session_id: &SessionId, f: F) -> Transition
    where
        F: FnOnce(&mut TrainingSession) -> Transition,
    {
        let mut sessions = lock(&self.sessions);
        let transition = sessions.get_mut(session_id).map_or(Transition::Missing, f);
        drop(sessions);
        note_transition(operation, session_id, transition);
        transition
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, session_id: &SessionId, spec: &JobSpec) -> StoreResult<TrainingSession> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "training_session_created");
                TrainingSession::new(session_id.clone(), spec.clone())
            })
            .clone();
        Ok(session)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<TrainingSession>> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }

    fn update_status(&self, session_id: &SessionId, status: TrainingStatus) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("update_status", session_id, |s| s.apply_status(status, now)))
    }

    fn update_progress(&self, session_id: &SessionId, snapshot: &EpochSnapshot) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("update_progress", session_id, |s| {
            if s.apply_progress(snapshot.clone(), now) {
                Transition::Applied { from: s.status }
            } else {
                Transition::Rejected { current: s.status }
            }
        }))
    }

    fn touch(&self, session_id: &SessionId) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("touch", session_id, |s| {
            if s.apply_heartbeat(now) {
                Transition::Applied { from: s.status }
            } else {
                Transition::Rejected { current: s.status }
            }
        }))
    }

    fn complete(&self, session_id: &SessionId, metrics: &TrainingMetrics) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("complete", session_id, |s| s.apply_completion(metrics.clone(), now)))
    }

    fn fail(&self, session_id: &SessionId, reason: &str) -> StoreResult<Transition> {
        let now = Utc::now();
        Ok(self.modify("fail", session_id, |s| s.apply_failure(reason, now)))
    }

    fn count_active(&self) -> StoreResult<usize> {
        Ok(lock(&self.sessions).values().filter(|s| s.status == TrainingStatus::InProgress).count())
    }

    fn list_active(&self) -> StoreResult<Vec<TrainingSession>> {
        let mut active: Vec<TrainingSession> = lock(&self.sessions)
            .values()
            .filter(|s| s.status == TrainingStatus::InProgress)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }
}
