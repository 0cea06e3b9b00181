//! Collaborator contracts for the model-execution and data-fetch backends.
//!
//! Both are opaque to the orchestrator: it hands the trainer two plain
//! callbacks and treats any error as a reason to fall over.

use crate::error::TrainingResult;
use crate::job::JobSpec;
use crate::progress::Stage;
use crate::session::TrainingMetrics;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// One daily bar of the fetched time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Tabular time series for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub ticker: String,
    pub bars: Vec<Bar>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> TrainingResult<TimeSeries>;
}

/// Stage boundary reported by a trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    /// 0–100 progress inside the stage, if the trainer tracks it.
    pub sub_progress: Option<f64>,
    pub message: String,
    pub details: Value,
}

impl StageReport {
    #[must_use]
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self { stage, sub_progress: None, message: message.into(), details: Value::Null }
    }

    #[must_use]
    pub fn with_sub_progress(mut self, sub_progress: f64) -> Self {
        self.sub_progress = Some(sub_progress);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Epoch boundary reported by a trainer. `epoch` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: u32,
    pub total_epochs: u32,
    pub accuracy: f64,
    pub loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
}

/// Raw numeric series (loss, accuracy, predictions, ...) keyed by name.
pub type TrainingSeries = BTreeMap<String, Vec<f64>>;

/// Result of a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub metrics: TrainingMetrics,
    pub series: TrainingSeries,
}

/// Called at every stage boundary. `Break` asks the trainer to stop.
pub type StageCallback<'a> = &'a (dyn Fn(StageReport) -> ControlFlow<()> + Send + Sync);

/// Called at every epoch boundary. `Break` asks the trainer to stop.
pub type EpochCallback<'a> = &'a (dyn Fn(EpochReport) -> ControlFlow<()> + Send + Sync);

/// Model-execution backend.
///
/// Implementations keep the potentially slow fit off the reactor. The callbacks
/// are borrowed, so use `tokio::task::block_in_place` or a scoped thread rather
/// than `spawn_blocking`. Stop at the next boundary once a callback breaks.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fit(
        &self,
        spec: &JobSpec,
        data: &TimeSeries,
        on_stage: StageCallback<'_>,
        on_epoch: EpochCallback<'_>,
    ) -> TrainingResult<FitOutcome>;
}
