//! Foresight Core
//!
//! Process-level plumbing around the training orchestrator:
//! - SQLite-backed job records (`storage`)
//! - Layered configuration (`config`)
//! - Tracing subscriber setup (`logging`)
//! - Offline collaborators (`backends`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use foresight_core::{backends::{CsvDataSource, UnconfiguredTrainer}, config::Config};
//!
//! # async fn run() -> foresight_core::Result<()> {
//! let config = Config::load(None)?;
//! foresight_core::logging::init(&config.logging)?;
//! let orchestrator = foresight_core::orchestrator(
//!     &config,
//!     Arc::new(UnconfiguredTrainer),
//!     Arc::new(CsvDataSource::new("data")),
//! )?;
//! # drop(orchestrator);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use foresight_orchestrator::TrainingOrchestrator;
use foresight_training::{DataSource, Trainer};

pub mod backends;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::Config;
pub use error::{CoreError, Result};
pub use storage::{Database, SqliteJobStore, StorageError};

/// Assembles an orchestrator from configuration.
///
/// Opens the configured store and must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or no runtime is running.
pub fn orchestrator(
    config: &Config,
    trainer: Arc<dyn Trainer>,
    data_source: Arc<dyn DataSource>,
) -> Result<TrainingOrchestrator> {
    let store = config.storage.open_store()?;
    let orchestrator = TrainingOrchestrator::builder(trainer, data_source)
        .store(store)
        .config(config.orchestrator.clone())
        .simulation(config.simulation.clone())
        .build()?;
    Ok(orchestrator)
}
