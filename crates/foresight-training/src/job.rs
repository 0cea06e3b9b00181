use crate::error::{TrainingError, TrainingResult};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Hard upper bound on epochs accepted for any job.
pub const EPOCH_LIMIT: u32 = 1000;

/// Identifier for a training session. Doubles as the broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Network family requested for the job. Opaque to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "CNN")]
    Cnn,
    #[serde(rename = "LSTM")]
    Lstm,
    #[serde(rename = "CNN-LSTM")]
    CnnLstm,
    #[serde(rename = "LSTM-CNN")]
    LstmCnn,
}

impl ModelType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cnn => "CNN",
            Self::Lstm => "LSTM",
            Self::CnnLstm => "CNN-LSTM",
            Self::LstmCnn => "LSTM-CNN",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CNN" => Ok(Self::Cnn),
            "LSTM" => Ok(Self::Lstm),
            "CNN-LSTM" => Ok(Self::CnnLstm),
            "LSTM-CNN" => Ok(Self::LstmCnn),
            other => Err(TrainingError::invalid(format!(
                "model_type must be one of CNN, LSTM, CNN-LSTM, LSTM-CNN (got '{other}')"
            ))),
        }
    }
}

fn default_batch_size() -> u32 {
    32
}

fn default_learning_rate() -> f64 {
    0.001
}

/// Requested configuration for one training job.
///
/// Everything except `epochs` is echoed back to the model collaborator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub ticker: String,
    pub model_type: ModelType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lookback: u32,
    pub epochs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl JobSpec {
    #[must_use]
    pub fn new(
        ticker: impl Into<String>,
        model_type: ModelType,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            model_type,
            start_date,
            end_date,
            lookback: 30,
            epochs: 100,
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
        }
    }

    #[must_use]
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, lookback: u32) -> Self {
        self.lookback = lookback;
        self
    }

    /// Upper-cases and trims the ticker.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.ticker = self.ticker.trim().to_ascii_uppercase();
        self
    }

    /// Validates against today's UTC date.
    pub fn validate(&self, max_epochs: u32) -> TrainingResult<()> {
        self.validate_at(Utc::now().date_naive(), max_epochs)
    }

    pub fn validate_at(&self, today: NaiveDate, max_epochs: u32) -> TrainingResult<()> {
        let ticker = self.ticker.trim();
        if ticker.is_empty() {
            return Err(TrainingError::invalid("ticker cannot be empty"));
        }
        if ticker.len() > 20 {
            return Err(TrainingError::invalid("ticker must be at most 20 characters"));
        }
        if !ticker.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(TrainingError::invalid(
                "ticker can only contain letters, numbers, hyphens, and underscores",
            ));
        }

        if self.start_date > today {
            return Err(TrainingError::invalid("start_date cannot be in the future"));
        }
        if self.end_date <= self.start_date {
            return Err(TrainingError::invalid("end_date must be after start_date"));
        }

        if !(10..=365).contains(&self.lookback) {
            return Err(TrainingError::invalid("lookback must be between 10 and 365 days"));
        }

        let max_epochs = max_epochs.clamp(1, EPOCH_LIMIT);
        if !(1..=max_epochs).contains(&self.epochs) {
            return Err(TrainingError::invalid(format!(
                "epochs must be between 1 and {max_epochs}"
            )));
        }

        if !(8..=256).contains(&self.batch_size) {
            return Err(TrainingError::invalid("batch_size must be between 8 and 256"));
        }
        if !self.learning_rate.is_finite() || !(0.0001..=0.1).contains(&self.learning_rate) {
            return Err(TrainingError::invalid("learning_rate must be between 0.0001 and 0.1"));
        }
        Ok(())
    }
}
