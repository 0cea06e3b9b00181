//! Durable training-session record and its lifecycle state machine.
//!
//! Stores hold [`TrainingSession`] values and mutate them exclusively through the
//! `apply_*` methods here, so every backend enforces the same transition rules.

use crate::job::{JobSpec, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingStatus {
    /// Admitted record, worker not yet scheduled.
    Pending,
    /// A worker owns the session.
    InProgress,
    /// Finished with a full metrics set.
    Completed,
    /// Terminated by an unrecoverable worker failure.
    Failed,
    /// Stopped by an explicit cancellation request.
    Cancelled,
}

impl TrainingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Checks if the session can move from `self` to `to`.
    ///
    /// Same-state moves are not transitions; callers treat them as no-ops.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown training status '{other}'")),
        }
    }
}

/// Final metrics of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub loss: f64,
    #[serde(default)]
    pub r2: Option<f64>,
    #[serde(default)]
    pub mae: Option<f64>,
    #[serde(default)]
    pub rmse: Option<f64>,
    #[serde(default)]
    pub mape: Option<f64>,
}

impl TrainingMetrics {
    #[must_use]
    pub fn new(accuracy: f64, loss: f64) -> Self {
        Self {
            accuracy,
            loss,
            r2: None,
            mae: None,
            rmse: None,
            mape: None,
        }
    }
}

/// Latest per-epoch metrics observed while the session is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch: u32,
    pub total_epochs: u32,
    pub accuracy: f64,
    pub loss: f64,
}

/// Outcome of a single read-modify-write against a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The change was written; carries the status before the write.
    Applied { from: TrainingStatus },
    /// The record already held the requested state.
    Unchanged,
    /// The state machine refused the change.
    Rejected { current: TrainingStatus },
    /// No record exists for the id.
    Missing,
}

impl Transition {
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// One row of the job record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub session_id: SessionId,
    pub spec: JobSpec,
    pub status: TrainingStatus,
    pub metrics: Option<TrainingMetrics>,
    pub progress: Option<EpochSnapshot>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrainingSession {
    /// Creates a PENDING record.
    #[must_use]
    pub fn new(session_id: SessionId, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            spec,
            status: TrainingStatus::Pending,
            metrics: None,
            progress: None,
            error: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn apply_status(&mut self, to: TrainingStatus, now: DateTime<Utc>) -> Transition {
        if self.status == to {
            return Transition::Unchanged;
        }
        if !self.status.can_transition_to(to) {
            return Transition::Rejected { current: self.status };
        }
        // COMPLETED carries metrics, so it is only reachable through `apply_completion`.
        if to == TrainingStatus::Completed && self.metrics.is_none() {
            return Transition::Rejected { current: self.status };
        }
        let from = self.status;
        self.status = to;
        self.updated_at = now;
        if to == TrainingStatus::InProgress {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Transition::Applied { from }
    }

    pub fn apply_completion(&mut self, metrics: TrainingMetrics, now: DateTime<Utc>) -> Transition {
        match self.status {
            TrainingStatus::InProgress => {
                self.metrics = Some(metrics);
                self.status = TrainingStatus::Completed;
                self.updated_at = now;
                self.completed_at = Some(now);
                Transition::Applied { from: TrainingStatus::InProgress }
            }
            TrainingStatus::Completed => Transition::Unchanged,
            current => Transition::Rejected { current },
        }
    }

    pub fn apply_failure(&mut self, reason: &str, now: DateTime<Utc>) -> Transition {
        let transition = self.apply_status(TrainingStatus::Failed, now);
        if transition.is_applied() {
            self.error = Some(reason.to_string());
        }
        transition
    }

    /// Records the latest epoch metrics. Only a running session accepts progress
    /// and the recorded epoch never moves backwards.
    pub fn apply_progress(&mut self, snapshot: EpochSnapshot, now: DateTime<Utc>) -> bool {
        if self.status != TrainingStatus::InProgress {
            return false;
        }
        if self.progress.as_ref().is_some_and(|p| snapshot.epoch < p.epoch) {
            return false;
        }
        self.progress = Some(snapshot);
        self.updated_at = now;
        true
    }

    /// Marks a running session as still owned by a live worker.
    pub fn apply_heartbeat(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TrainingStatus::InProgress {
            return false;
        }
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ModelType;
    use chrono::NaiveDate;

    fn session() -> TrainingSession {
        let spec = JobSpec::new(
            "BTC-USD",
            ModelType::Cnn,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        TrainingSession::new(SessionId::from("s-1"), spec)
    }

    #[test]
    fn test_status_transitions() {
        use TrainingStatus::{Cancelled, Completed, Failed, InProgress, Pending};

        assert!(Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Cancelled));

        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!InProgress.can_transition_to(Pending));

        for terminal in [Completed, Failed, Cancelled] {
            for to in [Pending, InProgress, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut s = session();
        let now = Utc::now();
        assert!(s.apply_status(TrainingStatus::InProgress, now).is_applied());
        assert_eq!(s.started_at, Some(now));
        assert!(s.completed_at.is_none());

        let done = now + chrono::Duration::seconds(5);
        let t = s.apply_completion(TrainingMetrics::new(0.9, 0.1), done);
        assert_eq!(t, Transition::Applied { from: TrainingStatus::InProgress });
        assert_eq!(s.completed_at, Some(done));

        // completed_at is written once
        let later = done + chrono::Duration::seconds(5);
        assert_eq!(s.apply_status(TrainingStatus::Completed, later), Transition::Unchanged);
        assert_eq!(
            s.apply_status(TrainingStatus::Cancelled, later),
            Transition::Rejected { current: TrainingStatus::Completed }
        );
        assert_eq!(s.completed_at, Some(done));
    }

    #[test]
    fn test_completed_requires_metrics() {
        let mut s = session();
        s.apply_status(TrainingStatus::InProgress, Utc::now());
        assert_eq!(
            s.apply_status(TrainingStatus::Completed, Utc::now()),
            Transition::Rejected { current: TrainingStatus::InProgress }
        );
        assert!(s.metrics.is_none());
    }

    #[test]
    fn test_completion_after_cancel_is_rejected() {
        let mut s = session();
        s.apply_status(TrainingStatus::InProgress, Utc::now());
        s.apply_status(TrainingStatus::Cancelled, Utc::now());
        let t = s.apply_completion(TrainingMetrics::new(0.9, 0.1), Utc::now());
        assert_eq!(t, Transition::Rejected { current: TrainingStatus::Cancelled });
        assert!(s.metrics.is_none());
    }

    #[test]
    fn test_progress_only_while_running() {
        let mut s = session();
        let snap = EpochSnapshot { epoch: 1, total_epochs: 3, accuracy: 0.4, loss: 0.6 };
        assert!(!s.apply_progress(snap.clone(), Utc::now()));
        s.apply_status(TrainingStatus::InProgress, Utc::now());
        assert!(s.apply_progress(snap.clone(), Utc::now()));
        assert_eq!(s.progress, Some(snap));
        assert!(s.metrics.is_none());
    }

    #[test]
    fn test_progress_epoch_never_regresses() {
        let mut s = session();
        s.apply_status(TrainingStatus::InProgress, Utc::now());
        let third = EpochSnapshot { epoch: 3, total_epochs: 5, accuracy: 0.6, loss: 0.4 };
        assert!(s.apply_progress(third.clone(), Utc::now()));

        let first = EpochSnapshot { epoch: 1, total_epochs: 5, accuracy: 0.7, loss: 0.3 };
        assert!(!s.apply_progress(first, Utc::now()));
        assert_eq!(s.progress, Some(third));

        let fourth = EpochSnapshot { epoch: 4, total_epochs: 5, accuracy: 0.7, loss: 0.3 };
        assert!(s.apply_progress(fourth, Utc::now()));
        assert_eq!(s.progress.as_ref().map(|p| p.epoch), Some(4));
    }

    #[test]
    fn test_heartbeat_only_while_running() {
        let mut s = session();
        let created = s.updated_at;
        let later = created + chrono::Duration::seconds(30);
        assert!(!s.apply_heartbeat(later));
        assert_eq!(s.updated_at, created);

        s.apply_status(TrainingStatus::InProgress, created);
        assert!(s.apply_heartbeat(later));
        assert_eq!(s.updated_at, later);
    }

    #[test]
    fn test_failure_records_reason() {
        let mut s = session();
        s.apply_status(TrainingStatus::InProgress, Utc::now());
        assert!(s.apply_failure("boom", Utc::now()).is_applied());
        assert_eq!(s.error.as_deref(), Some("boom"));
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(serde_json::to_string(&TrainingStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!("CANCELLED".parse::<TrainingStatus>().unwrap(), TrainingStatus::Cancelled);
    }
}
