//! Training orchestrator: admission, lifecycle, cancellation and status.

use chrono::Utc;
use foresight_training::{
    DataSource, EventEnvelope, JobSpec, Phase, ProgressState, SessionId, Stage, Trainer,
    TrainingSession, TrainingStatus, Transition, event_names, progress,
};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::admission::{Admission, AdmissionController};
use crate::broadcast::{EventBroadcaster, EventStream, SubscriberHandle};
use crate::config::{OrchestratorConfig, SimulationConfig};
use crate::error::{OrchestratorError, Result};
use crate::locks::lock;
use crate::scheduler::{Scheduler, TaskHandle, TokioScheduler};
use crate::store::{JobStore, MemoryJobStore};
use crate::worker::Worker;

/// Failure reason recorded for IN_PROGRESS sessions that have no worker.
pub const WORKER_LOST: &str = "worker lost";

/// In-memory state of a session owned by a worker of this process.
#[derive(Debug, Default)]
pub(crate) struct LiveWorker {
    pub(crate) progress: ProgressState,
    pub(crate) handle: Option<TaskHandle>,
}

impl LiveWorker {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| !h.is_finished())
    }
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) trainer: Arc<dyn Trainer>,
    pub(crate) data_source: Arc<dyn DataSource>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) broadcaster: Arc<EventBroadcaster>,
    pub(crate) simulation: SimulationConfig,
    pub(crate) workers: Mutex<HashMap<SessionId, LiveWorker>>,
    config: OrchestratorConfig,
    admission: AdmissionController,
    // Serializes check-then-start so concurrent starts never overrun the ceiling.
    admission_gate: Mutex<()>,
}

/// Returned by a successful [`TrainingOrchestrator::start`].
#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub session_id: SessionId,
    /// Completes when the worker has published its terminal event.
    pub handle: TaskHandle,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    NotInProgress(TrainingStatus),
}

impl CancelOutcome {
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Polling view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub session_id: SessionId,
    pub status: TrainingStatus,
    pub stage: String,
    pub percentage: u8,
    pub session: TrainingSession,
}

/// Result of one supervisory sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// IN_PROGRESS sessions without a live worker, now FAILED.
    pub orphaned: Vec<SessionId>,
    /// Sessions cancelled for exceeding the training timeout.
    pub timed_out: Vec<SessionId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.orphaned.is_empty() && self.timed_out.is_empty()
    }
}

/// Builder for [`TrainingOrchestrator`].
pub struct OrchestratorBuilder {
    trainer: Arc<dyn Trainer>,
    data_source: Arc<dyn DataSource>,
    store: Option<Arc<dyn JobStore>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    broadcaster: Option<Arc<EventBroadcaster>>,
    config: OrchestratorConfig,
    simulation: SimulationConfig,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn broadcaster(mut self, broadcaster: Arc<EventBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    /// Builds the orchestrator. Without an explicit scheduler the current tokio
    /// runtime is used.
    pub fn build(self) -> Result<TrainingOrchestrator> {
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };
        let store: Arc<dyn JobStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryJobStore::new()),
        };
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Arc::new(EventBroadcaster::new(self.config.event_buffer)));
        let admission = AdmissionController::new(self.config.max_concurrent_sessions, Arc::clone(&store));

        info!(
            max_concurrent_sessions = self.config.max_concurrent_sessions,
            trainer = self.trainer.id(),
            data_source = self.data_source.id(),
            "orchestrator_initialized"
        );

        Ok(TrainingOrchestrator {
            inner: Arc::new(Inner {
                store,
                trainer: self.trainer,
                data_source: self.data_source,
                scheduler,
                broadcaster,
                simulation: self.simulation,
                workers: Mutex::new(HashMap::new()),
                config: self.config,
                admission,
                admission_gate: Mutex::new(()),
            }),
        })
    }
}

/// Drives training sessions from PENDING to a terminal state.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<Inner>,
}

impl TrainingOrchestrator {
    pub fn builder(trainer: Arc<dyn Trainer>, data_source: Arc<dyn DataSource>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            trainer,
            data_source,
            store: None,
            scheduler: None,
            broadcaster: None,
            config: OrchestratorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.inner.broadcaster
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Starts a job under a generated session id.
    pub fn submit(&self, spec: JobSpec) -> Result<StartReceipt> {
        self.start(SessionId::generate(), spec)
    }

    /// Admits and schedules a training job.
    ///
    /// Returns as soon as the worker is scheduled. Capacity rejection leaves the
    /// PENDING record in place so the same id can be started again later.
    pub fn start(&self, session_id: SessionId, spec: JobSpec) -> Result<StartReceipt> {
        let inner = &self.inner;
        let spec = spec.normalized();
        spec.validate(inner.config.max_epochs).map_err(OrchestratorError::Validation)?;

        let gate = lock(&inner.admission_gate);
        let session = inner.store.create(&session_id, &spec)?;
        if session.status != TrainingStatus::Pending {
            return Err(OrchestratorError::AlreadyStarted { session_id, status: session.status });
        }

        if let Admission::Denied { active, ceiling } = inner.admission.check()? {
            warn!(session_id = %session_id, active, ceiling, "training_capacity_reached");
            return Err(OrchestratorError::Capacity { active, ceiling });
        }

        lock(&inner.workers).insert(session_id.clone(), LiveWorker::default());
        match inner.store.update_status(&session_id, TrainingStatus::InProgress) {
            Ok(Transition::Applied { .. }) => {}
            Ok(transition) => {
                lock(&inner.workers).remove(&session_id);
                let status = match transition {
                    Transition::Rejected { current } => current,
                    _ => TrainingStatus::InProgress,
                };
                return Err(OrchestratorError::AlreadyStarted { session_id, status });
            }
            Err(e) => {
                lock(&inner.workers).remove(&session_id);
                return Err(e.into());
            }
        }
        drop(gate);

        let worker = Worker::new(Arc::clone(inner), session_id.clone(), session.spec);
        let handle = match inner.scheduler.schedule(worker.run().boxed()) {
            Ok(handle) => handle,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "worker_schedule_failed");
                lock(&inner.workers).remove(&session_id);
                if let Err(store_err) = inner.store.fail(&session_id, &e.to_string()) {
                    error!(session_id = %session_id, error = %store_err, "failed_to_mark_session_failed");
                }
                inner.publish_failure(&session_id, &e.to_string());
                return Err(e);
            }
        };
        if let Some(live) = lock(&inner.workers).get_mut(&session_id) {
            live.handle = Some(handle.clone());
        }

        info!(
            session_id = %session_id,
            ticker = %spec.ticker,
            model_type = %spec.model_type,
            epochs = spec.epochs,
            "training_session_started"
        );
        Ok(StartReceipt { session_id, handle })
    }

    /// Requests cooperative cancellation of a running session.
    ///
    /// The worker stops at its next stage or epoch boundary and publishes
    /// `training_cancelled`.
    pub fn cancel(&self, session_id: &SessionId) -> Result<CancelOutcome> {
        let inner = &self.inner;
        let (transition, live) = {
            let workers = lock(&inner.workers);
            let transition = inner.store.update_status(session_id, TrainingStatus::Cancelled)?;
            (transition, workers.contains_key(session_id))
        };

        let outcome = match transition {
            Transition::Applied { .. } => {
                info!(session_id = %session_id, "training_cancelled");
                if !live {
                    inner.broadcaster.publish(
                        session_id,
                        &EventEnvelope::new(
                            session_id.clone(),
                            Phase::Complete,
                            event_names::TRAINING_CANCELLED,
                            json!({ "message": "Training cancelled" }),
                        ),
                    );
                }
                CancelOutcome::Cancelled
            }
            Transition::Missing => CancelOutcome::NotFound,
            Transition::Unchanged => CancelOutcome::NotInProgress(TrainingStatus::Cancelled),
            Transition::Rejected { current } => CancelOutcome::NotInProgress(current),
        };
        Ok(outcome)
    }

    /// Maps the session's status to a stage and percentage.
    pub fn status(&self, session_id: &SessionId) -> Result<Option<StatusSnapshot>> {
        let Some(session) = self.inner.store.get(session_id)? else {
            return Ok(None);
        };

        let persisted = session.progress.as_ref().map(|snapshot| {
            progress(
                Stage::Training,
                foresight_training::epoch_fraction(snapshot.epoch, snapshot.total_epochs),
                0.0,
            )
        });
        let live = self.live_progress(session_id);

        let (stage, percentage) = match session.status {
            TrainingStatus::Pending => ("pending", 0),
            TrainingStatus::Completed => (Stage::Complete.as_str(), 100),
            TrainingStatus::Failed => ("failed", 0),
            TrainingStatus::Cancelled => ("cancelled", live.map(|(_, p)| p).or(persisted).unwrap_or(0)),
            TrainingStatus::InProgress => match (live, persisted) {
                (Some((stage, percent)), _) => (stage.map_or(Stage::DataFetching.as_str(), Stage::as_str), percent),
                (None, Some(percent)) => (Stage::Training.as_str(), percent),
                (None, None) => (Stage::DataFetching.as_str(), 0),
            },
        };

        Ok(Some(StatusSnapshot {
            session_id: session.session_id.clone(),
            status: session.status,
            stage: stage.to_string(),
            percentage,
            session,
        }))
    }

    /// Every session currently IN_PROGRESS.
    pub fn list_active(&self) -> Result<Vec<TrainingSession>> {
        Ok(self.inner.store.list_active()?)
    }

    /// Registers a new subscriber with the broadcaster.
    pub fn connect(&self) -> (SubscriberHandle, EventStream) {
        self.inner.broadcaster.connect()
    }

    pub fn subscribe(&self, session_id: &SessionId, handle: &SubscriberHandle) -> bool {
        self.inner.broadcaster.subscribe(session_id, handle)
    }

    pub fn unsubscribe(&self, session_id: &SessionId, handle: &SubscriberHandle) -> bool {
        self.inner.broadcaster.unsubscribe(session_id, handle)
    }

    /// Connects a subscriber and joins it to `session_id` in one step.
    pub fn watch(&self, session_id: &SessionId) -> (SubscriberHandle, EventStream) {
        let (handle, stream) = self.connect();
        self.subscribe(session_id, &handle);
        (handle, stream)
    }

    /// Fails IN_PROGRESS sessions whose worker is gone and cancels sessions that
    /// exceeded the training timeout.
    ///
    /// A session this process started is lost as soon as its worker has
    /// finished. A session owned by no worker here may belong to another process
    /// sharing the store, so it only counts as lost once its record has not been
    /// written for `stale_after_secs`.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let inner = &self.inner;
        let now = Utc::now();
        let timeout = inner.config.training_timeout();
        let stale_after = inner.config.stale_after();
        let mut report = ReconcileReport::default();

        for session in inner.store.list_active()? {
            let id = &session.session_id;
            let orphaned = {
                let mut workers = lock(&inner.workers);
                let lost = match workers.get(id) {
                    Some(live) => !live.is_running(),
                    None => (now - session.updated_at).to_std().is_ok_and(|idle| idle >= stale_after),
                };
                if lost {
                    workers.remove(id);
                    inner.store.fail(id, WORKER_LOST)?.is_applied()
                } else {
                    false
                }
            };
            if orphaned {
                warn!(session_id = %id, "orphaned_session_failed");
                inner.publish_failure(id, WORKER_LOST);
                report.orphaned.push(id.clone());
                continue;
            }

            let overdue = match (timeout, session.started_at) {
                (Some(limit), Some(started)) => (now - started).to_std().is_ok_and(|elapsed| elapsed > limit),
                _ => false,
            };
            if overdue && self.cancel(id)?.is_cancelled() {
                warn!(session_id = %id, timeout_secs = inner.config.training_timeout_secs, "training_timed_out");
                report.timed_out.push(id.clone());
            }
        }

        debug!(
            orphaned = report.orphaned.len(),
            timed_out = report.timed_out.len(),
            "reconcile_completed"
        );
        Ok(report)
    }

    /// Runs [`reconcile`](Self::reconcile) periodically until the orchestrator
    /// is dropped.
    pub fn spawn_supervisor(&self) -> Result<TaskHandle> {
        let weak = Arc::downgrade(&self.inner);
        let scheduler = Arc::clone(&self.inner.scheduler);
        let interval = self.inner.config.supervisor_interval();
        let sleeper = Arc::clone(&scheduler);

        scheduler.schedule(
            async move {
                loop {
                    sleeper.sleep(interval).await;
                    let Some(inner) = weak.upgrade() else {
                        debug!("supervisor_stopped");
                        break;
                    };
                    match (TrainingOrchestrator { inner }).reconcile() {
                        Ok(report) if !report.is_empty() => {
                            info!(
                                orphaned = report.orphaned.len(),
                                timed_out = report.timed_out.len(),
                                "supervisor_reconciled_sessions"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "supervisor_sweep_failed"),
                    }
                }
            }
            .boxed(),
        )
    }

    fn live_progress(&self, session_id: &SessionId) -> Option<(Option<Stage>, u8)> {
        lock(&self.inner.workers)
            .get(session_id)
            .map(|w| (w.progress.stage(), w.progress.percent()))
    }
}

impl Inner {
    pub(crate) fn publish_failure(&self, session_id: &SessionId, reason: &str) {
        self.broadcaster.publish(session_id, &failure_event(session_id, reason));
    }
}

pub(crate) fn failure_event(session_id: &SessionId, reason: &str) -> EventEnvelope {
    EventEnvelope::new(
        session_id.clone(),
        Phase::Error,
        event_names::TRAINING_FAILED,
        json!({ "message": "Training failed", "error": reason }),
    )
}

impl std::fmt::Debug for TrainingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOrchestrator")
            .field("config", &self.inner.config)
            .field("live_workers", &lock(&self.inner.workers).len())
            .finish_non_exhaustive()
    }
}
