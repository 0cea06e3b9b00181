//! Argument types shared by the command implementations.

use chrono::NaiveDate;
use clap::Args;
use foresight_training::{JobSpec, ModelType};
use std::path::PathBuf;

/// Arguments of `foresight train`.
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Ticker symbol (e.g. BTC-USD)
    #[arg(short, long)]
    pub ticker: String,

    /// Model type (CNN, LSTM, CNN-LSTM, LSTM-CNN)
    #[arg(short, long)]
    pub model: ModelType,

    /// First day of the training window (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,

    /// Last day of the training window (YYYY-MM-DD)
    #[arg(long)]
    pub end: NaiveDate,

    /// Number of training epochs
    #[arg(short, long, default_value_t = 100)]
    pub epochs: u32,

    /// Lookback window in days
    #[arg(long, default_value_t = 30)]
    pub lookback: u32,

    /// Batch size
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Session ID to use instead of a generated one
    #[arg(long)]
    pub session_id: Option<String>,

    /// Directory holding <TICKER>.csv price files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}

impl TrainArgs {
    /// Builds the job specification. Validation happens when the job starts.
    pub fn spec(&self) -> JobSpec {
        let mut spec = JobSpec::new(self.ticker.clone(), self.model, self.start, self.end)
            .with_epochs(self.epochs)
            .with_lookback(self.lookback);
        if let Some(batch_size) = self.batch_size {
            spec.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            spec.learning_rate = learning_rate;
        }
        spec
    }
}

/// Arguments of `foresight cleanup`.
#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Remove finished sessions created more than this many days ago
    #[arg(long, default_value_t = 30)]
    pub older_than_days: u32,
}
