//! Multi-stage progress calculation.
//!
//! Every pipeline stage owns a fixed ceiling. Training, evaluation and
//! visualisation move inside a band that ends at the next stage's ceiling;
//! every other stage reports exactly its own ceiling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named phase of the training pipeline, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DataFetching,
    DataFetched,
    Preprocessing,
    FeatureEngineering,
    ModelBuilding,
    ModelInfo,
    Training,
    Evaluating,
    Visualizing,
    Complete,
}

impl Stage {
    pub const ALL: [Self; 10] = [
        Self::DataFetching,
        Self::DataFetched,
        Self::Preprocessing,
        Self::FeatureEngineering,
        Self::ModelBuilding,
        Self::ModelInfo,
        Self::Training,
        Self::Evaluating,
        Self::Visualizing,
        Self::Complete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataFetching => "data_fetching",
            Self::DataFetched => "data_fetched",
            Self::Preprocessing => "preprocessing",
            Self::FeatureEngineering => "feature_engineering",
            Self::ModelBuilding => "model_building",
            Self::ModelInfo => "model_info",
            Self::Training => "training",
            Self::Evaluating => "evaluating",
            Self::Visualizing => "visualizing",
            Self::Complete => "complete",
        }
    }

    /// Percentage reached when this stage is entered.
    pub const fn ceiling(self) -> u8 {
        match self {
            Self::DataFetching => 5,
            Self::DataFetched => 10,
            Self::Preprocessing => 15,
            Self::FeatureEngineering => 20,
            Self::ModelBuilding => 25,
            Self::ModelInfo => 30,
            Self::Training => 40,
            Self::Evaluating => 70,
            Self::Visualizing => 85,
            Self::Complete => 100,
        }
    }

    /// The stage after this one, `None` for `Complete`.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::DataFetching => Some(Self::DataFetched),
            Self::DataFetched => Some(Self::Preprocessing),
            Self::Preprocessing => Some(Self::FeatureEngineering),
            Self::FeatureEngineering => Some(Self::ModelBuilding),
            Self::ModelBuilding => Some(Self::ModelInfo),
            Self::ModelInfo => Some(Self::Training),
            Self::Training => Some(Self::Evaluating),
            Self::Evaluating => Some(Self::Visualizing),
            Self::Visualizing => Some(Self::Complete),
            Self::Complete => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Ceiling for a stage.
pub const fn stage_ceiling(stage: Stage) -> u8 {
    stage.ceiling()
}

/// Ceiling for a stage given by name; unknown names yield 0.
pub fn stage_ceiling_by_name(name: &str) -> u8 {
    name.parse::<Stage>().map_or(0, Stage::ceiling)
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}

fn band(base: u8, top: u8, fraction: f64) -> u8 {
    let value = f64::from(base) + fraction / 100.0 * f64::from(top - base);
    (value.round() as u8).min(top)
}

/// Maps a stage plus sub-progress fractions (0–100) to an overall percentage.
///
/// `epoch_fraction` is only read for [`Stage::Training`], `sub_fraction` only for
/// the evaluation and visualisation bands. Out-of-range fractions are clamped.
pub fn progress(stage: Stage, epoch_fraction: f64, sub_fraction: f64) -> u8 {
    let base = stage.ceiling();
    match stage {
        Stage::Training => band(base, Stage::Evaluating.ceiling(), clamp_fraction(epoch_fraction)),
        Stage::Evaluating | Stage::Visualizing => {
            let top = stage.next().map_or(base, Stage::ceiling);
            band(base, top, clamp_fraction(sub_fraction))
        }
        _ => base,
    }
}

/// Same as [`progress`] for a stage given by name; unknown names yield 0.
pub fn progress_by_name(stage: &str, epoch_fraction: f64, sub_fraction: f64) -> u8 {
    stage.parse::<Stage>().map_or(0, |stage| progress(stage, epoch_fraction, sub_fraction))
}

/// Epoch boundary expressed as a 0–100 fraction of the training run.
pub fn epoch_fraction(epoch: u32, total_epochs: u32) -> f64 {
    if total_epochs == 0 {
        return 0.0;
    }
    f64::from(epoch.min(total_epochs)) / f64::from(total_epochs) * 100.0
}

/// Per-session progress cursor.
///
/// Never reports a lower percentage than it already has, whatever order the
/// producer reports stages in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    stage: Option<Stage>,
    sub_progress: f64,
    epoch_fraction: f64,
    percent: u8,
}

impl ProgressState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn sub_progress(&self) -> f64 {
        self.sub_progress
    }

    pub fn epoch_fraction(&self) -> f64 {
        self.epoch_fraction
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Enters (or re-reports) a stage with an optional sub-progress fraction.
    pub fn advance(&mut self, stage: Stage, sub_progress: Option<f64>) -> u8 {
        if self.stage != Some(stage) {
            self.stage = Some(stage);
            self.sub_progress = 0.0;
        }
        if let Some(sub) = sub_progress {
            self.sub_progress = clamp_fraction(sub);
        }
        self.record(progress(stage, self.epoch_fraction, self.sub_progress))
    }

    /// Records an epoch boundary inside the training stage.
    pub fn advance_epoch(&mut self, epoch: u32, total_epochs: u32) -> u8 {
        self.stage = Some(Stage::Training);
        self.epoch_fraction = epoch_fraction(epoch, total_epochs);
        self.sub_progress = self.epoch_fraction;
        self.record(progress(Stage::Training, self.epoch_fraction, 0.0))
    }

    fn record(&mut self, computed: u8) -> u8 {
        self.percent = self.percent.max(computed);
        self.percent
    }
}
