//! Background worker driving one training session.
//!
//! The worker tries the real trainer first and falls over to the simulated
//! path on any error or panic. Whatever happens, [`Worker::finalize`] leaves the
//! record in a terminal state and publishes exactly one terminal event.

use foresight_training::{
    EpochReport, EpochSnapshot, EventEnvelope, FitOutcome, JobSpec, Phase, SessionId, Stage,
    StageReport, TrainingError, TrainingMetrics, TrainingResult, TrainingSeries, TrainingStatus,
    Transition, event_names,
};
use futures::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::locks::lock;
use crate::orchestrator::{Inner, failure_event};
use crate::simulation::{self, ResumePoint, SimulationPlan};

pub(crate) struct Worker {
    inner: Arc<Inner>,
    session_id: SessionId,
    spec: JobSpec,
    started: AtomicBool,
    stop_observed: AtomicBool,
    terminal_sent: AtomicBool,
    last_epoch: AtomicU32,
    total_epochs: AtomicU32,
    // Last epoch reported by either path; the simulated path continues from it.
    resume: Mutex<Option<ResumePoint>>,
}

impl Worker {
    pub(crate) fn new(inner: Arc<Inner>, session_id: SessionId, spec: JobSpec) -> Self {
        Self {
            inner,
            session_id,
            spec,
            started: AtomicBool::new(false),
            stop_observed: AtomicBool::new(false),
            terminal_sent: AtomicBool::new(false),
            last_epoch: AtomicU32::new(0),
            total_epochs: AtomicU32::new(0),
            resume: Mutex::new(None),
        }
    }

    pub(crate) async fn run(self) {
        let failure = match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("worker panicked: {}", panic_message(&*panic))),
        };
        if let Some(reason) = &failure {
            error!(
                session_id = %self.session_id,
                stage = self.current_stage(),
                error = %reason,
                "training_execution_failed"
            );
        }
        self.finalize(failure.as_deref());
    }

    async fn drive(&self) -> Result<()> {
        let real = AssertUnwindSafe(self.real_path())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(TrainingError::Trainer(format!("trainer panicked: {}", panic_message(&*panic))))
            });

        let outcome = match real {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    session_id = %self.session_id,
                    stage = self.current_stage(),
                    error = %e,
                    "real_training_failed_falling_back"
                );
                if self.stop_requested() {
                    None
                } else {
                    self.simulated_path().await
                }
            }
        };

        match outcome {
            Some(outcome) => self.finish(outcome),
            None => Ok(()),
        }
    }

    /// `Ok(None)` means the session stopped being IN_PROGRESS.
    async fn real_path(&self) -> TrainingResult<Option<FitOutcome>> {
        let spec = &self.spec;
        let fetching = StageReport::new(Stage::DataFetching, format!("Fetching data for {}", spec.ticker));
        if self.on_stage(fetching).is_break() {
            return Ok(None);
        }

        let data = self
            .inner
            .data_source
            .fetch(&spec.ticker, spec.start_date, spec.end_date)
            .await?;
        if data.is_empty() {
            return Err(TrainingError::DataFetch(format!("no data returned for {}", spec.ticker)));
        }
        self.inner.scheduler.yield_now().await;

        let fetched = StageReport::new(Stage::DataFetched, format!("Fetched {} data points", data.len()))
            .with_details(json!({ "rows": data.len(), "source": self.inner.data_source.id() }));
        if self.on_stage(fetched).is_break() {
            return Ok(None);
        }

        let on_stage = |report: StageReport| self.on_stage(report);
        let on_epoch = |report: EpochReport| self.on_epoch(report);
        let fitted = self.inner.trainer.fit(spec, &data, &on_stage, &on_epoch).await;
        self.inner.scheduler.yield_now().await;

        if self.stop_requested() {
            return Ok(None);
        }
        fitted.map(Some)
    }

    async fn simulated_path(&self) -> Option<FitOutcome> {
        let sim = &self.inner.simulation;
        let resume = *lock(&self.resume);
        let SimulationPlan { metrics, epochs } = {
            let mut rng = simulation::rng_for(sim);
            match resume {
                Some(point) => simulation::plan_resumed(point, sim, &mut rng),
                None => simulation::plan(self.spec.epochs, sim, &mut rng),
            }
        };
        info!(
            session_id = %self.session_id,
            epochs = epochs.len(),
            resumed_after = resume.map_or(0, |p| p.epoch),
            "simulated_training_started"
        );

        // Clients that saw the real run start are already listening.
        if !self.started.load(Ordering::SeqCst) && !sim.join_grace().is_zero() {
            self.inner.scheduler.sleep(sim.join_grace()).await;
        }
        if self.stop_requested() {
            return None;
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            self.publish_started(epochs.first().map_or(0, |e| e.total_epochs));
        }

        let mut series = TrainingSeries::new();
        for report in epochs {
            series.entry("accuracy".to_string()).or_default().push(report.accuracy);
            series.entry("loss".to_string()).or_default().push(report.loss);
            if self.on_epoch(report).is_break() {
                return None;
            }
            self.inner.scheduler.sleep(sim.epoch_delay()).await;
        }

        let evaluating = StageReport::new(Stage::Evaluating, "Evaluating model").with_sub_progress(100.0);
        if self.on_stage(evaluating).is_break() {
            return None;
        }
        Some(FitOutcome { metrics, series })
    }

    fn finish(&self, outcome: FitOutcome) -> Result<()> {
        let FitOutcome { metrics, series } = outcome;
        if !series.is_empty() {
            let percent = self.advance(|p| p.advance(Stage::Visualizing, None));
            self.publish(
                EventEnvelope::new(
                    self.session_id.clone(),
                    Phase::Visualize,
                    event_names::TRAINING_SERIES,
                    json!({ "series": series }),
                )
                .with_progress(percent),
            );
        }

        match self.inner.store.complete(&self.session_id, &metrics)? {
            Transition::Applied { .. } | Transition::Unchanged => {
                self.inner.store.update_status(&self.session_id, TrainingStatus::Completed)?;
                self.advance(|p| p.advance(Stage::Complete, None));
                self.publish_terminal(
                    EventEnvelope::new(
                        self.session_id.clone(),
                        Phase::Complete,
                        event_names::TRAINING_COMPLETED,
                        self.completion_payload(&metrics),
                    )
                    .with_progress(100),
                );
                info!(
                    session_id = %self.session_id,
                    accuracy = metrics.accuracy,
                    loss = metrics.loss,
                    "training_completed"
                );
            }
            Transition::Rejected { current } => {
                info!(session_id = %self.session_id, status = %current, "training_result_discarded");
            }
            Transition::Missing => {}
        }
        Ok(())
    }

    /// Leaves the record terminal, sends the terminal event if none was sent yet
    /// and drops the in-memory progress.
    fn finalize(&self, failure: Option<&str>) {
        let fallback_reason = failure.unwrap_or("worker exited without reaching a terminal state");
        let (record, last_percent) = {
            let mut workers = lock(&self.inner.workers);
            let last_percent = workers.remove(&self.session_id).map_or(0, |live| live.progress.percent());
            let running = matches!(
                self.inner.store.get(&self.session_id),
                Ok(Some(ref session)) if session.status == TrainingStatus::InProgress
            );
            if running {
                if let Err(e) = self.inner.store.fail(&self.session_id, fallback_reason) {
                    error!(session_id = %self.session_id, error = %e, "failed_to_mark_session_failed");
                }
            }
            (self.inner.store.get(&self.session_id), last_percent)
        };

        if self.terminal_sent.load(Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "worker_finished");
            return;
        }

        let envelope = match record {
            Ok(Some(session)) => match session.status {
                TrainingStatus::Cancelled => {
                    info!(session_id = %self.session_id, "training_stopped_after_cancel");
                    EventEnvelope::new(
                        self.session_id.clone(),
                        Phase::Complete,
                        event_names::TRAINING_CANCELLED,
                        json!({ "message": "Training cancelled" }),
                    )
                    .with_progress(last_percent)
                }
                TrainingStatus::Completed => {
                    let metrics = session.metrics.unwrap_or_else(|| TrainingMetrics::new(0.0, 0.0));
                    EventEnvelope::new(
                        self.session_id.clone(),
                        Phase::Complete,
                        event_names::TRAINING_COMPLETED,
                        self.completion_payload(&metrics),
                    )
                    .with_progress(100)
                }
                _ => failure_event(&self.session_id, session.error.as_deref().unwrap_or(fallback_reason)),
            },
            Ok(None) => failure_event(&self.session_id, fallback_reason),
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "session_lookup_failed");
                failure_event(&self.session_id, fallback_reason)
            }
        };
        self.publish_terminal(envelope);
    }

    fn on_stage(&self, report: StageReport) -> ControlFlow<()> {
        if self.stop_requested() {
            return ControlFlow::Break(());
        }
        match report.stage {
            Stage::Training => {
                if !self.started.swap(true, Ordering::SeqCst) {
                    self.publish_started(self.spec.epochs);
                }
            }
            // The terminal event stands in for the final stage.
            Stage::Complete => {}
            stage => {
                if let Err(e) = self.inner.store.touch(&self.session_id) {
                    warn!(session_id = %self.session_id, error = %e, "heartbeat_write_failed");
                }
                let percent = self.advance(|p| p.advance(stage, report.sub_progress));
                debug!(session_id = %self.session_id, stage = %stage, percent, "training_stage");
                self.publish(
                    EventEnvelope::new(
                        self.session_id.clone(),
                        Phase::for_stage(stage),
                        stage.as_str(),
                        json!({ "message": report.message, "details": report.details }),
                    )
                    .with_progress(percent),
                );
            }
        }
        ControlFlow::Continue(())
    }

    fn on_epoch(&self, report: EpochReport) -> ControlFlow<()> {
        if self.stop_requested() {
            return ControlFlow::Break(());
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            self.publish_started(report.total_epochs);
        }

        self.last_epoch.store(report.epoch, Ordering::SeqCst);
        self.total_epochs.store(report.total_epochs, Ordering::SeqCst);
        *lock(&self.resume) = Some(ResumePoint::from(&report));
        let percent = self.advance(|p| p.advance_epoch(report.epoch, report.total_epochs));

        let snapshot = EpochSnapshot {
            epoch: report.epoch,
            total_epochs: report.total_epochs,
            accuracy: report.accuracy,
            loss: report.loss,
        };
        if let Err(e) = self.inner.store.update_progress(&self.session_id, &snapshot) {
            warn!(session_id = %self.session_id, error = %e, "progress_write_failed");
        }

        self.publish(
            EventEnvelope::new(
                self.session_id.clone(),
                Phase::Train,
                event_names::TRAINING_PROGRESS,
                json!({
                    "epoch": report.epoch,
                    "total_epochs": report.total_epochs,
                    "accuracy": report.accuracy,
                    "loss": report.loss,
                    "val_accuracy": report.val_accuracy,
                    "val_loss": report.val_loss,
                    "message": format!("Epoch {}/{}", report.epoch, report.total_epochs),
                }),
            )
            .with_progress(percent),
        );
        ControlFlow::Continue(())
    }

    fn publish_started(&self, total_epochs: u32) {
        let percent = self.advance(|p| p.advance(Stage::Training, None));
        self.publish(
            EventEnvelope::new(
                self.session_id.clone(),
                Phase::Train,
                event_names::TRAINING_STARTED,
                json!({ "message": "Training started", "total_epochs": total_epochs }),
            )
            .with_progress(percent),
        );
    }

    /// Polls the record; once it is no longer IN_PROGRESS the worker stops for good.
    fn stop_requested(&self) -> bool {
        if self.stop_observed.load(Ordering::SeqCst) {
            return true;
        }
        let status = match self.inner.store.get(&self.session_id) {
            Ok(Some(session)) => session.status,
            Ok(None) => {
                warn!(session_id = %self.session_id, "session_record_missing");
                self.stop_observed.store(true, Ordering::SeqCst);
                return true;
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "status_poll_failed");
                return false;
            }
        };
        if status == TrainingStatus::InProgress {
            return false;
        }
        info!(session_id = %self.session_id, status = %status, "training_stop_observed");
        self.stop_observed.store(true, Ordering::SeqCst);
        true
    }

    fn advance(&self, f: impl FnOnce(&mut foresight_training::ProgressState) -> u8) -> u8 {
        let mut workers = lock(&self.inner.workers);
        match workers.get_mut(&self.session_id) {
            Some(live) => f(&mut live.progress),
            None => f(&mut foresight_training::ProgressState::new()),
        }
    }

    fn current_stage(&self) -> &'static str {
        lock(&self.inner.workers)
            .get(&self.session_id)
            .and_then(|w| w.progress.stage())
            .map_or("none", Stage::as_str)
    }

    fn publish(&self, envelope: EventEnvelope) {
        if self.terminal_sent.load(Ordering::SeqCst) || self.stop_observed.load(Ordering::SeqCst) {
            debug!(session_id = %self.session_id, event = %envelope.event, "event_suppressed");
            return;
        }
        self.inner.broadcaster.publish(&self.session_id, &envelope);
    }

    fn publish_terminal(&self, envelope: EventEnvelope) {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.broadcaster.publish(&self.session_id, &envelope);
    }

    fn completion_payload(&self, metrics: &TrainingMetrics) -> Value {
        json!({
            "message": "Training completed successfully",
            "final_accuracy": round4(metrics.accuracy),
            "final_loss": round4(metrics.loss),
            "epoch": self.last_epoch.load(Ordering::SeqCst),
            "total_epochs": self.total_epochs.load(Ordering::SeqCst),
            "metrics": {
                "r2": metrics.r2,
                "mae": metrics.mae,
                "rmse": metrics.rmse,
                "mape": metrics.mape,
            },
        })
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
