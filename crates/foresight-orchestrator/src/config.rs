//! Orchestrator and simulated-path settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admission::DEFAULT_MAX_CONCURRENT_SESSIONS;
use crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ceiling on concurrently IN_PROGRESS sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// Upper bound accepted for `JobSpec::epochs`.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: u32,

    /// Sessions running longer than this are cancelled by the supervisor. 0 disables.
    #[serde(default = "default_training_timeout_secs")]
    pub training_timeout_secs: u64,

    /// Per-subscriber event queue capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Interval between supervisory sweeps.
    #[serde(default = "default_supervisor_interval_secs")]
    pub supervisor_interval_secs: u64,

    /// An IN_PROGRESS record owned by no worker of this process counts as
    /// lost once it has not been written for this long. 0 treats every such
    /// record as lost immediately.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_max_concurrent_sessions() -> usize {
    DEFAULT_MAX_CONCURRENT_SESSIONS
}

fn default_max_epochs() -> u32 {
    foresight_training::EPOCH_LIMIT
}

fn default_training_timeout_secs() -> u64 {
    3600
}

fn default_event_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

fn default_supervisor_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_epochs: default_max_epochs(),
            training_timeout_secs: default_training_timeout_secs(),
            event_buffer: default_event_buffer(),
            supervisor_interval_secs: default_supervisor_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn training_timeout(&self) -> Option<Duration> {
        (self.training_timeout_secs > 0).then(|| Duration::from_secs(self.training_timeout_secs))
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Settings of the fail-over execution path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Cap on simulated epochs.
    #[serde(default = "default_sim_max_epochs")]
    pub max_epochs: u32,

    /// Pause before the first simulated event so clients can subscribe.
    #[serde(default = "default_join_grace_ms")]
    pub join_grace_ms: u64,

    /// Pause after each simulated epoch.
    #[serde(default = "default_epoch_delay_ms")]
    pub epoch_delay_ms: u64,

    /// Fixed RNG seed; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sim_max_epochs() -> u32 {
    20
}

fn default_join_grace_ms() -> u64 {
    3000
}

fn default_epoch_delay_ms() -> u64 {
    2000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_sim_max_epochs(),
            join_grace_ms: default_join_grace_ms(),
            epoch_delay_ms: default_epoch_delay_ms(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// No pauses; used by tests and batch runs.
    pub fn immediate() -> Self {
        Self { join_grace_ms: 0, epoch_delay_ms: 0, ..Self::default() }
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }

    pub fn epoch_delay(&self) -> Duration {
        Duration::from_millis(self.epoch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_sessions, 10);
        assert_eq!(config.max_epochs, 1000);
        assert_eq!(config.training_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.stale_after(), Duration::from_secs(600));

        let sim = SimulationConfig::default();
        assert_eq!(sim.max_epochs, 20);
        assert_eq!(sim.join_grace(), Duration::from_secs(3));
        assert_eq!(sim.epoch_delay(), Duration::from_secs(2));
        assert!(sim.seed.is_none());
    }

    #[test]
    fn test_partial_deserialization() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_concurrent_sessions": 2, "training_timeout_secs": 0}"#).unwrap();
        assert_eq!(config.max_concurrent_sessions, 2);
        assert_eq!(config.max_epochs, 1000);
        assert!(config.training_timeout().is_none());

        let sim: SimulationConfig = serde_json::from_str(r#"{"seed": 7}"#).unwrap();
        assert_eq!(sim.seed, Some(7));
        assert_eq!(sim.max_epochs, 20);
    }
}
