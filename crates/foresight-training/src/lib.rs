//! Foresight Training
//!
//! Backend-agnostic training primitives for:
//! - Describing and validating training jobs (`JobSpec`)
//! - The durable session record and its lifecycle (`TrainingSession`)
//! - Stage-based progress calculation (`ProgressState`)
//! - Event envelopes published to subscribers (`EventEnvelope`)
//! - Model-execution and data-fetch collaborators (`Trainer`, `DataSource`)

pub mod error;
pub mod event;
pub mod job;
pub mod progress;
pub mod session;
pub mod trainer;

pub use error::{TrainingError, TrainingResult};
pub use event::{EventEnvelope, Phase, names as event_names};
pub use job::{EPOCH_LIMIT, JobSpec, ModelType, SessionId};
pub use progress::{
    ProgressState, Stage, epoch_fraction, progress, progress_by_name, stage_ceiling,
    stage_ceiling_by_name,
};
pub use session::{EpochSnapshot, TrainingMetrics, TrainingSession, TrainingStatus, Transition};
pub use trainer::{
    Bar, DataSource, EpochCallback, EpochReport, FitOutcome, StageCallback, StageReport,
    TimeSeries, Trainer, TrainingSeries,
};
