//! Training-job orchestration for Foresight.
//!
//! This crate admits training jobs under a concurrency ceiling, runs each one
//! as an independently scheduled worker, and fans the worker's progress out to
//! topic subscribers:
//! - [`EventBroadcaster`]: topic-scoped, non-blocking publish/subscribe
//! - [`JobStore`]: durable session records (an in-memory store lives here)
//! - [`AdmissionController`]: ceiling on IN_PROGRESS sessions
//! - [`TrainingOrchestrator`]: lifecycle, fail-over, cancellation and status

pub mod admission;
pub mod broadcast;
pub mod config;
pub mod error;
mod locks;
pub mod orchestrator;
pub mod scheduler;
pub mod simulation;
pub mod store;
mod worker;

pub use admission::{Admission, AdmissionController, DEFAULT_MAX_CONCURRENT_SESSIONS};
pub use broadcast::{EventBroadcaster, EventStream, SubscriberHandle};
pub use config::{OrchestratorConfig, SimulationConfig};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{
    CancelOutcome, OrchestratorBuilder, ReconcileReport, StartReceipt, StatusSnapshot,
    TrainingOrchestrator, WORKER_LOST,
};
pub use scheduler::{Scheduler, Task, TaskHandle, TokioScheduler};
pub use store::{JobStore, MemoryJobStore, StoreError, StoreResult};
