//! Command implementations for the Foresight CLI.

pub mod cancel;
pub mod config;
pub mod reconcile;
pub mod sessions;
pub mod status;
pub mod train;
pub mod types;

use anyhow::{Context as _, Result, bail};
use foresight_core::backends::{CsvDataSource, UnconfiguredTrainer};
use foresight_core::{Config, SqliteJobStore};
use foresight_orchestrator::TrainingOrchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loaded settings shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Orchestrator over the configured store, reading prices from `data_dir`.
    pub fn orchestrator(&self, data_dir: impl Into<PathBuf>) -> Result<TrainingOrchestrator> {
        foresight_core::orchestrator(
            &self.config,
            Arc::new(UnconfiguredTrainer),
            Arc::new(CsvDataSource::new(data_dir)),
        )
        .context("Failed to start the training orchestrator")
    }

    /// Orchestrator for commands that only inspect or maintain records.
    pub fn persistent_orchestrator(&self) -> Result<TrainingOrchestrator> {
        self.database()?;
        self.orchestrator("data")
    }

    /// The configured session database. Inspection commands need one.
    pub fn database(&self) -> Result<&Path> {
        match self.config.storage.database_path.as_deref() {
            Some(path) => Ok(path),
            None => bail!(
                "no session database configured; pass --database or set storage.database_path"
            ),
        }
    }

    pub fn sqlite_store(&self) -> Result<SqliteJobStore> {
        let path = self.database()?;
        SqliteJobStore::open(path)
            .with_context(|| format!("Failed to open session database {}", path.display()))
    }
}
