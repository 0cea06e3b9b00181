//! Collaborators available without an external model backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use foresight_training::{
    Bar, DataSource, EpochCallback, FitOutcome, JobSpec, StageCallback, TimeSeries, Trainer,
    TrainingError, TrainingResult,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads daily bars from `<dir>/<TICKER>.csv`.
///
/// The file needs a header row with `date,open,high,low,close` and optionally
/// `volume`; dates are `YYYY-MM-DD`. Rows outside `[start, end]` are dropped.
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    dir: PathBuf,
}

impl CsvDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{ticker}.csv"))
    }
}

fn read_bars(path: &Path, start: NaiveDate, end: NaiveDate) -> TrainingResult<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| TrainingError::DataFetch(format!("{}: {e}", path.display())))?;
    let mut bars = Vec::new();
    for record in reader.deserialize::<Bar>() {
        let bar = record.map_err(|e| TrainingError::DataFetch(format!("{}: {e}", path.display())))?;
        if (start..=end).contains(&bar.date) {
            bars.push(bar);
        }
    }
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

#[async_trait]
impl DataSource for CsvDataSource {
    fn id(&self) -> &'static str {
        "csv"
    }

    async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> TrainingResult<TimeSeries> {
        let path = self.path_for(ticker);
        debug!(ticker, path = %path.display(), "reading_price_history");
        let bars = tokio::task::spawn_blocking(move || read_bars(&path, start, end))
            .await
            .map_err(|e| TrainingError::DataFetch(e.to_string()))??;
        Ok(TimeSeries { ticker: ticker.to_string(), bars })
    }
}

/// Trainer used when no model backend is linked in. Every fit fails, so jobs
/// run through the fail-over path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTrainer;

#[async_trait]
impl Trainer for UnconfiguredTrainer {
    fn id(&self) -> &'static str {
        "unconfigured"
    }

    async fn fit(
        &self,
        _spec: &JobSpec,
        _data: &TimeSeries,
        _on_stage: StageCallback<'_>,
        _on_epoch: EpochCallback<'_>,
    ) -> TrainingResult<FitOutcome> {
        Err(TrainingError::Trainer("no model backend configured".to_string()))
    }
}
