//! Shared collaborator doubles for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use foresight_orchestrator::{
    EventStream, JobStore, OrchestratorConfig, SimulationConfig, StoreError, StoreResult,
    TrainingOrchestrator,
};
use foresight_training::{
    Bar, DataSource, EpochCallback, EpochReport, EpochSnapshot, EventEnvelope, FitOutcome, JobSpec,
    ModelType, SessionId, Stage, StageCallback, StageReport, TimeSeries, Trainer, TrainingError,
    TrainingMetrics, TrainingResult, TrainingSeries, TrainingSession, TrainingStatus, Transition,
};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub fn spec(epochs: u32) -> JobSpec {
    JobSpec::new(
        "btc-usd",
        ModelType::Lstm,
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
    )
    .with_epochs(epochs)
}

pub fn simulation() -> SimulationConfig {
    SimulationConfig { seed: Some(7), ..SimulationConfig::immediate() }
}

pub fn orchestrator(trainer: Arc<dyn Trainer>) -> TrainingOrchestrator {
    orchestrator_with(trainer, OrchestratorConfig::default(), None)
}

pub fn orchestrator_with(
    trainer: Arc<dyn Trainer>,
    config: OrchestratorConfig,
    store: Option<Arc<dyn JobStore>>,
) -> TrainingOrchestrator {
    let mut builder = TrainingOrchestrator::builder(trainer, Arc::new(StaticDataSource::new(60)))
        .config(config)
        .simulation(simulation());
    if let Some(store) = store {
        builder = builder.store(store);
    }
    builder.build().unwrap()
}

pub fn ceiling(max_concurrent_sessions: usize) -> OrchestratorConfig {
    OrchestratorConfig { max_concurrent_sessions, ..OrchestratorConfig::default() }
}

/// Reads events until one named `event` arrives; returns everything read.
pub async fn read_until(stream: &mut EventStream, event: &str) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    while let Some(envelope) = stream.recv().await {
        let done = envelope.event == event;
        seen.push(envelope);
        if done {
            break;
        }
    }
    seen
}

pub fn names(events: &[EventEnvelope]) -> Vec<&str> {
    events.iter().map(|e| e.event.as_str()).collect()
}

/// Returns `rows` synthetic daily bars.
pub struct StaticDataSource {
    rows: usize,
}

impl StaticDataSource {
    pub fn new(rows: usize) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    fn id(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, ticker: &str, start: NaiveDate, _end: NaiveDate) -> TrainingResult<TimeSeries> {
        let bars = (0..self.rows)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    date: start + Days::new(i as u64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect();
        Ok(TimeSeries { ticker: ticker.to_string(), bars })
    }
}

fn stopped() -> TrainingError {
    TrainingError::Trainer("stopped by callback".to_string())
}

fn final_metrics() -> TrainingMetrics {
    TrainingMetrics {
        accuracy: 0.91,
        loss: 0.09,
        r2: Some(0.8),
        mae: Some(420.0),
        rmse: Some(610.0),
        mape: Some(3.5),
    }
}

fn epoch_report(epoch: u32, total: u32) -> EpochReport {
    let t = f64::from(epoch) / f64::from(total);
    EpochReport {
        epoch,
        total_epochs: total,
        accuracy: 0.4f64.mul_add(t, 0.5),
        loss: 0.4f64.mul_add(-t, 0.5),
        val_accuracy: None,
        val_loss: None,
    }
}

/// Walks the canonical pipeline; optionally fails right after reporting a stage.
pub struct ScriptedTrainer {
    fail_at: Option<Stage>,
    panic_at: Option<Stage>,
    fail_after_epoch: Option<u32>,
}

impl ScriptedTrainer {
    pub fn succeeding() -> Self {
        Self { fail_at: None, panic_at: None, fail_after_epoch: None }
    }

    pub fn failing_at(stage: Stage) -> Self {
        Self { fail_at: Some(stage), ..Self::succeeding() }
    }

    pub fn panicking_at(stage: Stage) -> Self {
        Self { panic_at: Some(stage), ..Self::succeeding() }
    }

    /// Reports epochs up to `epoch`, then fails.
    pub fn failing_after_epoch(epoch: u32) -> Self {
        Self { fail_after_epoch: Some(epoch), ..Self::succeeding() }
    }
}

#[async_trait]
impl Trainer for ScriptedTrainer {
    fn id(&self) -> &'static str {
        "scripted"
    }

    async fn fit(
        &self,
        spec: &JobSpec,
        _data: &TimeSeries,
        on_stage: StageCallback<'_>,
        on_epoch: EpochCallback<'_>,
    ) -> TrainingResult<FitOutcome> {
        for stage in [
            Stage::Preprocessing,
            Stage::FeatureEngineering,
            Stage::ModelBuilding,
            Stage::ModelInfo,
            Stage::Training,
        ] {
            if on_stage(StageReport::new(stage, stage.as_str())).is_break() {
                return Err(stopped());
            }
            if self.fail_at == Some(stage) {
                return Err(TrainingError::Trainer(format!("model build exploded at {stage}")));
            }
            assert!(self.panic_at != Some(stage), "trainer blew up at {stage}");
        }

        let total = spec.epochs;
        for epoch in 1..=total {
            if on_epoch(epoch_report(epoch, total)).is_break() {
                return Err(stopped());
            }
            if self.fail_after_epoch == Some(epoch) {
                return Err(TrainingError::Trainer(format!("optimizer diverged after epoch {epoch}")));
            }
        }

        for sub in [0.0, 50.0, 100.0] {
            if on_stage(StageReport::new(Stage::Evaluating, "evaluating").with_sub_progress(sub)).is_break() {
                return Err(stopped());
            }
        }
        if on_stage(StageReport::new(Stage::Visualizing, "visualizing").with_sub_progress(100.0)).is_break() {
            return Err(stopped());
        }

        let mut series = TrainingSeries::new();
        series.insert("loss".to_string(), (1..=total).map(|e| epoch_report(e, total).loss).collect());
        Ok(FitOutcome { metrics: final_metrics(), series })
    }
}

/// Reports the first epoch, then waits until released.
pub struct GatedTrainer {
    gate: Arc<Semaphore>,
}

impl GatedTrainer {
    pub fn new() -> Self {
        Self { gate: Arc::new(Semaphore::new(0)) }
    }

    /// Lets every waiting (and future) fit continue.
    pub fn release(&self) {
        self.gate.add_permits(1024);
    }
}

#[async_trait]
impl Trainer for GatedTrainer {
    fn id(&self) -> &'static str {
        "gated"
    }

    async fn fit(
        &self,
        spec: &JobSpec,
        _data: &TimeSeries,
        on_stage: StageCallback<'_>,
        on_epoch: EpochCallback<'_>,
    ) -> TrainingResult<FitOutcome> {
        let total = spec.epochs;
        if on_stage(StageReport::new(Stage::Training, "training")).is_break() {
            return Err(stopped());
        }
        if on_epoch(epoch_report(1, total)).is_break() {
            return Err(stopped());
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TrainingError::Trainer(e.to_string()))?;

        for epoch in 2..=total {
            if on_epoch(epoch_report(epoch, total)).is_break() {
                return Err(stopped());
            }
        }
        Ok(FitOutcome { metrics: final_metrics(), series: TrainingSeries::new() })
    }
}

/// How [`FaultyStore`] misbehaves on `complete`.
#[derive(Debug, Clone, Copy)]
pub enum CompleteFault {
    Error,
    Panic,
}

/// Delegates to an in-memory store but breaks `complete`.
pub struct FaultyStore {
    inner: foresight_orchestrator::MemoryJobStore,
    fault: CompleteFault,
}

impl FaultyStore {
    pub fn new(fault: CompleteFault) -> Self {
        Self { inner: foresight_orchestrator::MemoryJobStore::new(), fault }
    }
}

impl JobStore for FaultyStore {
    fn create(&self, session_id: &SessionId, spec: &JobSpec) -> StoreResult<TrainingSession> {
        self.inner.create(session_id, spec)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<TrainingSession>> {
        self.inner.get(session_id)
    }

    fn update_status(&self, session_id: &SessionId, status: TrainingStatus) -> StoreResult<Transition> {
        self.inner.update_status(session_id, status)
    }

    fn update_progress(&self, session_id: &SessionId, snapshot: &EpochSnapshot) -> StoreResult<Transition> {
        self.inner.update_progress(session_id, snapshot)
    }

    fn touch(&self, session_id: &SessionId) -> StoreResult<Transition> {
        self.inner.touch(session_id)
    }

    fn complete(&self, _session_id: &SessionId, _metrics: &TrainingMetrics) -> StoreResult<Transition> {
        match self.fault {
            CompleteFault::Error => Err(StoreError::Backend("disk full".to_string())),
            CompleteFault::Panic => panic!("store exploded"),
        }
    }

    fn fail(&self, session_id: &SessionId, reason: &str) -> StoreResult<Transition> {
        self.inner.fail(session_id, reason)
    }

    fn count_active(&self) -> StoreResult<usize> {
        self.inner.count_active()
    }

    fn list_active(&self) -> StoreResult<Vec<TrainingSession>> {
        self.inner.list_active()
    }
}

/// Reports every session as having started and last been written two hours
/// earlier than it was.
pub struct BackdatedStore {
    inner: foresight_orchestrator::MemoryJobStore,
}

impl BackdatedStore {
    pub fn new() -> Self {
        Self { inner: foresight_orchestrator::MemoryJobStore::new() }
    }

    fn backdate(mut session: TrainingSession) -> TrainingSession {
        let shift = chrono::Duration::hours(2);
        session.started_at = session.started_at.map(|t| t - shift);
        session.updated_at = session.updated_at - shift;
        session
    }
}

impl JobStore for BackdatedStore {
    fn create(&self, session_id: &SessionId, spec: &JobSpec) -> StoreResult<TrainingSession> {
        self.inner.create(session_id, spec)
    }

    fn get(&self, session_id: &SessionId) -> StoreResult<Option<TrainingSession>> {
        Ok(self.inner.get(session_id)?.map(Self::backdate))
    }

    fn update_status(&self, session_id: &SessionId, status: TrainingStatus) -> StoreResult<Transition> {
        self.inner.update_status(session_id, status)
    }

    fn update_progress(&self, session_id: &SessionId, snapshot: &EpochSnapshot) -> StoreResult<Transition> {
        self.inner.update_progress(session_id, snapshot)
    }

    fn touch(&self, session_id: &SessionId) -> StoreResult<Transition> {
        self.inner.touch(session_id)
    }

    fn complete(&self, session_id: &SessionId, metrics: &TrainingMetrics) -> StoreResult<Transition> {
        self.inner.complete(session_id, metrics)
    }

    fn fail(&self, session_id: &SessionId, reason: &str) -> StoreResult<Transition> {
        self.inner.fail(session_id, reason)
    }

    fn count_active(&self) -> StoreResult<usize> {
        self.inner.count_active()
    }

    fn list_active(&self) -> StoreResult<Vec<TrainingSession>> {
        Ok(self.inner.list_active()?.into_iter().map(Self::backdate).collect())
    }
}
