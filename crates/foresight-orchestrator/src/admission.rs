//! Concurrency ceiling on IN_PROGRESS sessions.

use std::sync::Arc;
use tracing::{debug, error};

use crate::store::{JobStore, StoreResult};

/// Default ceiling on concurrently running sessions.
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 10;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Denied { active: usize, ceiling: usize },
}

impl Admission {
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Compares the store's active count against a fixed ceiling.
///
/// The check does not reserve a slot; two racing admissions may both pass.
pub struct AdmissionController {
    ceiling: usize,
    store: Arc<dyn JobStore>,
}

impl AdmissionController {
    pub fn new(ceiling: usize, store: Arc<dyn JobStore>) -> Self {
        Self { ceiling, store }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn check(&self) -> StoreResult<Admission> {
        let active = self.store.count_active()?;
        let admission = if active >= self.ceiling {
            Admission::Denied { active, ceiling: self.ceiling }
        } else {
            Admission::Granted
        };
        debug!(active, ceiling = self.ceiling, granted = admission.is_granted(), "admission_checked");
        Ok(admission)
    }

    /// `true` when a new session may start. Store failures deny admission.
    pub fn try_admit(&self) -> bool {
        match self.check() {
            Ok(admission) => admission.is_granted(),
            Err(e) => {
                error!(error = %e, "admission_check_failed");
                false
            }
        }
    }
}
