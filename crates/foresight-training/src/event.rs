use crate::job::SessionId;
use crate::progress::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse pipeline phase carried by every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Data,
    Preprocess,
    Features,
    Build,
    Train,
    Evaluate,
    Visualize,
    Complete,
    Error,
}

impl Phase {
    pub const fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::DataFetching | Stage::DataFetched => Self::Data,
            Stage::Preprocessing => Self::Preprocess,
            Stage::FeatureEngineering => Self::Features,
            Stage::ModelBuilding | Stage::ModelInfo => Self::Build,
            Stage::Training => Self::Train,
            Stage::Evaluating => Self::Evaluate,
            Stage::Visualizing => Self::Visualize,
            Stage::Complete => Self::Complete,
        }
    }
}

/// Fine-grained event names.
pub mod names {
    pub const STATUS: &str = "status";
    pub const TRAINING_STARTED: &str = "training_started";
    pub const TRAINING_PROGRESS: &str = "training_progress";
    pub const TRAINING_SERIES: &str = "training_series";
    pub const TRAINING_COMPLETED: &str = "training_completed";
    pub const TRAINING_CANCELLED: &str = "training_cancelled";
    pub const TRAINING_FAILED: &str = "training_failed";

    /// Events after which nothing else is published for the session.
    pub const TERMINAL: [&str; 3] = [TRAINING_COMPLETED, TRAINING_CANCELLED, TRAINING_FAILED];
}

/// Structured progress/result event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: SessionId,
    pub phase: Phase,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(session_id: SessionId, phase: Phase, event: impl Into<String>, payload: Value) -> Self {
        Self { session_id, phase, event: event.into(), timestamp: Utc::now(), progress: None, payload }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    /// The join snapshot sent straight to a new subscriber.
    #[must_use]
    pub fn status_snapshot(session_id: SessionId) -> Self {
        Self::new(
            session_id,
            Phase::Data,
            names::STATUS,
            serde_json::json!({ "message": "Joined training room" }),
        )
        .with_progress(0)
    }

    pub fn is_terminal(&self) -> bool {
        names::TERMINAL.contains(&self.event.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serializes_iso_timestamp_and_phase() {
        let env = EventEnvelope::new(
            SessionId::from("s-1"),
            Phase::Train,
            names::TRAINING_PROGRESS,
            serde_json::json!({ "epoch": 1 }),
        )
        .with_progress(46);

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["phase"], "train");
        assert_eq!(value["progress"], 46);
        assert_eq!(value["session_id"], "s-1");
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_terminal_detection() {
        let done = EventEnvelope::new(
            SessionId::from("s"),
            Phase::Complete,
            names::TRAINING_COMPLETED,
            Value::Null,
        );
        assert!(done.is_terminal());
        assert!(!EventEnvelope::status_snapshot(SessionId::from("s")).is_terminal());
    }

    #[test]
    fn test_stage_phase_mapping() {
        assert_eq!(Phase::for_stage(Stage::DataFetched), Phase::Data);
        assert_eq!(Phase::for_stage(Stage::ModelInfo), Phase::Build);
        assert_eq!(Phase::for_stage(Stage::Visualizing), Phase::Visualize);
    }
}
