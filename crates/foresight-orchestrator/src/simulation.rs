//! Synthetic metrics for the fail-over execution path.

use foresight_training::{EpochReport, TrainingMetrics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;

/// Pre-computed course of a simulated run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    pub metrics: TrainingMetrics,
    pub epochs: Vec<EpochReport>,
}

/// Last epoch a failed real run reported before the simulated run takes over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumePoint {
    pub epoch: u32,
    pub total_epochs: u32,
    pub accuracy: f64,
    pub loss: f64,
}

impl From<&EpochReport> for ResumePoint {
    fn from(report: &EpochReport) -> Self {
        Self {
            epoch: report.epoch,
            total_epochs: report.total_epochs,
            accuracy: report.accuracy,
            loss: report.loss,
        }
    }
}

/// Number of epochs a simulated run produces for a requested count.
pub fn simulated_epochs(requested: u32, cap: u32) -> u32 {
    requested.min(cap).max(1)
}

pub fn rng_for(config: &SimulationConfig) -> StdRng {
    config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

fn around(rng: &mut StdRng, center: f64, spread: f64) -> f64 {
    rng.gen_range((center - spread)..=(center + spread))
}

fn final_metrics(rng: &mut StdRng) -> TrainingMetrics {
    let accuracy = around(rng, 0.85, 0.05);
    let loss = around(rng, 0.15, 0.05);
    TrainingMetrics {
        accuracy,
        loss,
        r2: Some(around(rng, 0.75, 0.1)),
        mae: Some(around(rng, 500.0, 100.0)),
        rmse: Some(around(rng, 800.0, 150.0)),
        mape: Some(around(rng, 5.0, 2.0)),
    }
}

/// Starting point and lower/upper bounds of a metric curve.
struct CurveStart {
    after_epoch: u32,
    accuracy: f64,
    loss: f64,
    accuracy_floor: f64,
    loss_ceiling: f64,
}

/// Builds reports for `schedule`, moving from `start` towards `metrics`.
///
/// Accuracy never decreases and loss never increases from one report to the
/// next; the report for `total` carries the final values.
fn curve(
    schedule: &[u32],
    total: u32,
    start: &CurveStart,
    metrics: &TrainingMetrics,
    rng: &mut StdRng,
) -> Vec<EpochReport> {
    let span = f64::from(total - start.after_epoch);
    let mut best_accuracy = start.accuracy_floor;
    let mut best_loss = start.loss_ceiling;
    schedule
        .iter()
        .map(|&epoch| {
            let t = f64::from(epoch - start.after_epoch) / span;
            let jitter = if epoch == total { 0.0 } else { rng.gen_range(-0.01..=0.01) };
            let raw_accuracy = (t * 0.8).mul_add(metrics.accuracy - start.accuracy, start.accuracy) + jitter;
            let raw_loss = (1.0 - t).mul_add(start.loss - metrics.loss, metrics.loss) - jitter;
            best_accuracy = best_accuracy.max(raw_accuracy.min(metrics.accuracy));
            best_loss = best_loss.min(raw_loss.max(metrics.loss));
            if epoch == total {
                best_accuracy = metrics.accuracy;
                best_loss = metrics.loss;
            }
            EpochReport {
                epoch,
                total_epochs: total,
                accuracy: best_accuracy,
                loss: best_loss,
                val_accuracy: None,
                val_loss: None,
            }
        })
        .collect()
}

/// Plans a simulated run with plausible, steadily improving metrics.
///
/// Accuracy never decreases and loss never increases from one epoch to the next;
/// the last epoch carries the final values.
pub fn plan(requested_epochs: u32, config: &SimulationConfig, rng: &mut StdRng) -> SimulationPlan {
    let total = simulated_epochs(requested_epochs, config.max_epochs);
    let metrics = final_metrics(rng);
    let schedule: Vec<u32> = (1..=total).collect();
    let start = CurveStart {
        after_epoch: 0,
        accuracy: 0.5,
        loss: 0.8,
        accuracy_floor: 0.0,
        loss_ceiling: f64::INFINITY,
    };
    let epochs = curve(&schedule, total, &start, &metrics, rng);
    SimulationPlan { metrics, epochs }
}

/// Plans the rest of a run that already reported epochs up to `from.epoch`.
///
/// Epoch numbers continue after `from.epoch` and end at the total the real run
/// announced. At most `max_epochs` of the remaining epochs are reported, spread
/// evenly; none when the real run already reported its last epoch. Metrics pick
/// up where the real run left off.
pub fn plan_resumed(from: ResumePoint, config: &SimulationConfig, rng: &mut StdRng) -> SimulationPlan {
    let metrics = final_metrics(rng);
    let total = from.total_epochs.max(from.epoch);
    let remaining = total - from.epoch;
    let count = if remaining == 0 { 0 } else { simulated_epochs(remaining, config.max_epochs) };
    let schedule = spread(from.epoch, remaining, count);

    let accuracy = from.accuracy.min(metrics.accuracy);
    let loss = from.loss.max(metrics.loss);
    let start = CurveStart {
        after_epoch: from.epoch,
        accuracy,
        loss,
        accuracy_floor: accuracy,
        loss_ceiling: loss,
    };
    let epochs = curve(&schedule, total, &start, &metrics, rng);
    SimulationPlan { metrics, epochs }
}

/// `count` strictly increasing epochs after `after`, the last one `after + remaining`.
fn spread(after: u32, remaining: u32, count: u32) -> Vec<u32> {
    (1..=count)
        .map(|i| after + (u64::from(i) * u64::from(remaining)).div_ceil(u64::from(count)) as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> (SimulationConfig, StdRng) {
        let config = SimulationConfig { seed: Some(seed), ..SimulationConfig::immediate() };
        let rng = rng_for(&config);
        (config, rng)
    }

    #[test]
    fn test_epoch_count_is_capped() {
        assert_eq!(simulated_epochs(5, 20), 5);
        assert_eq!(simulated_epochs(500, 20), 20);
        assert_eq!(simulated_epochs(0, 20), 1);
        assert_eq!(simulated_epochs(3, 0), 1);
    }

    #[test]
    fn test_metrics_fall_in_ranges() {
        for seed in 0..50 {
            let (config, mut rng) = seeded(seed);
            let p = plan(10, &config, &mut rng);
            let m = &p.metrics;
            assert!((0.80..=0.90).contains(&m.accuracy));
            assert!((0.10..=0.20).contains(&m.loss));
            assert!((0.65..=0.85).contains(&m.r2.unwrap()));
            assert!((400.0..=600.0).contains(&m.mae.unwrap()));
            assert!((650.0..=950.0).contains(&m.rmse.unwrap()));
            assert!((3.0..=7.0).contains(&m.mape.unwrap()));
        }
    }

    #[test]
    fn test_curves_improve_monotonically() {
        for seed in 0..50 {
            let (config, mut rng) = seeded(seed);
            let p = plan(20, &config, &mut rng);
            assert_eq!(p.epochs.len(), 20);
            for w in p.epochs.windows(2) {
                assert!(w[1].accuracy >= w[0].accuracy);
                assert!(w[1].loss <= w[0].loss);
                assert_eq!(w[1].epoch, w[0].epoch + 1);
            }
            let last = p.epochs.last().unwrap();
            assert_eq!(last.accuracy, p.metrics.accuracy);
            assert_eq!(last.loss, p.metrics.loss);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let (config, mut a) = seeded(42);
        let (_, mut b) = seeded(42);
        assert_eq!(plan(7, &config, &mut a), plan(7, &config, &mut b));
    }

    fn resume_at(epoch: u32, total_epochs: u32) -> ResumePoint {
        ResumePoint { epoch, total_epochs, accuracy: 0.62, loss: 0.41 }
    }

    #[test]
    fn test_resumed_plan_continues_epoch_numbers() {
        let (config, mut rng) = seeded(3);
        let p = plan_resumed(resume_at(3, 5), &config, &mut rng);
        let epochs: Vec<u32> = p.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![4, 5]);
        assert!(p.epochs.iter().all(|e| e.total_epochs == 5));

        let first = &p.epochs[0];
        assert!(first.accuracy >= 0.62);
        assert!(first.loss <= 0.41);
        let last = p.epochs.last().unwrap();
        assert_eq!(last.accuracy, p.metrics.accuracy);
        assert_eq!(last.loss, p.metrics.loss);
    }

    #[test]
    fn test_resumed_plan_spreads_capped_epochs() {
        let config = SimulationConfig { max_epochs: 4, seed: Some(1), ..SimulationConfig::immediate() };
        let mut rng = rng_for(&config);
        let p = plan_resumed(resume_at(10, 50), &config, &mut rng);
        let epochs: Vec<u32> = p.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![20, 30, 40, 50]);
        for w in p.epochs.windows(2) {
            assert!(w[1].accuracy >= w[0].accuracy);
            assert!(w[1].loss <= w[0].loss);
        }
    }

    #[test]
    fn test_resume_after_last_epoch_plans_no_epochs() {
        let (config, mut rng) = seeded(9);
        let p = plan_resumed(resume_at(5, 5), &config, &mut rng);
        assert!(p.epochs.is_empty());
        assert!((0.80..=0.90).contains(&p.metrics.accuracy));
    }
}
