//! Fail-over and catastrophic-failure tests.

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CompleteFault, FaultyStore, ScriptedTrainer, names, orchestrator, orchestrator_with, spec};
use foresight_orchestrator::{JobStore, OrchestratorConfig, TrainingOrchestrator};
use foresight_training::{
    DataSource, SessionId, Stage, TimeSeries, TrainingError, TrainingResult, TrainingStatus,
    event_names,
};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_failure_at_build_falls_over_to_simulation() {
    let orch = orchestrator(Arc::new(ScriptedTrainer::failing_at(Stage::ModelBuilding)));
    let id = SessionId::from("failover");
    let (_handle, mut stream) = orch.watch(&id);

    let receipt = orch.start(id.clone(), spec(5)).unwrap();
    let events = stream.until_terminal().await;
    receipt.handle.join().await;

    let session = orch.store().get(&id).unwrap().unwrap();
    assert_eq!(session.status, TrainingStatus::Completed);
    let metrics = session.metrics.unwrap();
    assert!((0.80..=0.90).contains(&metrics.accuracy));
    assert!((0.10..=0.20).contains(&metrics.loss));
    assert!(metrics.r2.is_some() && metrics.mae.is_some());
    assert!(metrics.rmse.is_some() && metrics.mape.is_some());
    assert!(session.error.is_none());

    let seen = names(&events);
    let build = seen.iter().position(|n| *n == "model_building").unwrap();
    assert_eq!(seen[build + 1], "training_started");
    assert_eq!(seen.iter().filter(|n| **n == "training_progress").count(), 5);
    assert_eq!(seen.last(), Some(&"training_completed"));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    // simulated epochs keep the same payload shape
    let epoch = events.iter().find(|e| e.event == "training_progress").unwrap();
    for key in ["epoch", "total_epochs", "accuracy", "loss", "message"] {
        assert!(!epoch.payload[key].is_null(), "missing {key}");
    }
}

#[tokio::test]
async fn test_failure_mid_training_continues_epoch_count() {
    let orch = orchestrator(Arc::new(ScriptedTrainer::failing_after_epoch(3)));
    let id = SessionId::from("mid-training");
    let (_handle, mut stream) = orch.watch(&id);

    let receipt = orch.start(id.clone(), spec(5)).unwrap();
    let events = stream.until_terminal().await;
    receipt.handle.join().await;

    let progress: Vec<_> = events.iter().filter(|e| e.event == event_names::TRAINING_PROGRESS).collect();
    let epochs: Vec<u64> = progress.iter().map(|e| e.payload["epoch"].as_u64().unwrap()).collect();
    assert_eq!(epochs, vec![1, 2, 3, 4, 5]);
    assert!(progress.iter().all(|e| e.payload["total_epochs"] == 5));
    for pair in progress.windows(2) {
        assert!(pair[1].progress > pair[0].progress);
        let (before, after) = (&pair[0].payload, &pair[1].payload);
        assert!(after["accuracy"].as_f64().unwrap() >= before["accuracy"].as_f64().unwrap());
        assert!(after["loss"].as_f64().unwrap() <= before["loss"].as_f64().unwrap());
    }
    assert_eq!(progress.last().unwrap().progress, Some(70));
    assert_eq!(names(&events).iter().filter(|n| **n == event_names::TRAINING_STARTED).count(), 1);

    let session = orch.store().get(&id).unwrap().unwrap();
    assert_eq!(session.status, TrainingStatus::Completed);
    assert_eq!(session.progress.unwrap().epoch, 5);
    assert_eq!(events.last().unwrap().payload["epoch"], 5);
}

#[tokio::test]
async fn test_simulated_epochs_are_capped() {
    let orch = orchestrator(Arc::new(ScriptedTrainer::failing_at(Stage::Preprocessing)));
    let id = SessionId::from("capped");
    let (_handle, mut stream) = orch.watch(&id);

    let receipt = orch.start(id, spec(500)).unwrap();
    let events = stream.until_terminal().await;
    receipt.handle.join().await;

    let progress: Vec<_> = events.iter().filter(|e| e.event == "training_progress").collect();
    assert_eq!(progress.len(), 20);
    assert_eq!(progress[0].payload["total_epochs"], 20);

    let accuracy: Vec<f64> = progress.iter().map(|e| e.payload["accuracy"].as_f64().unwrap()).collect();
    assert!(accuracy.windows(2).all(|w| w[0] <= w[1]));
    let loss: Vec<f64> = progress.iter().map(|e| e.payload["loss"].as_f64().unwrap()).collect();
    assert!(loss.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_trainer_panic_falls_over() {
    let orch = orchestrator(Arc::new(ScriptedTrainer::panicking_at(Stage::FeatureEngineering)));
    let receipt = orch.submit(spec(3)).unwrap();
    receipt.handle.join().await;

    let session = orch.store().get(&receipt.session_id).unwrap().unwrap();
    assert_eq!(session.status, TrainingStatus::Completed);
    assert!(session.metrics.is_some());
}

struct EmptyDataSource;

#[async_trait]
impl DataSource for EmptyDataSource {
    fn id(&self) -> &'static str {
        "empty"
    }

    async fn fetch(&self, ticker: &str, _start: NaiveDate, _end: NaiveDate) -> TrainingResult<TimeSeries> {
        Ok(TimeSeries { ticker: ticker.to_string(), bars: Vec::new() })
    }
}

struct BrokenDataSource;

#[async_trait]
impl DataSource for BrokenDataSource {
    fn id(&self) -> &'static str {
        "broken"
    }

    async fn fetch(&self, _ticker: &str, _start: NaiveDate, _end: NaiveDate) -> TrainingResult<TimeSeries> {
        Err(TrainingError::DataFetch("provider unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_data_fetch_errors_fall_over() {
    for source in [Arc::new(EmptyDataSource) as Arc<dyn DataSource>, Arc::new(BrokenDataSource)] {
        let orch = TrainingOrchestrator::builder(Arc::new(ScriptedTrainer::succeeding()), source)
            .simulation(common::simulation())
            .build()
            .unwrap();
        let id = SessionId::from("fetch");
        let (_handle, mut stream) = orch.watch(&id);
        let receipt = orch.start(id.clone(), spec(2)).unwrap();
        let events = stream.until_terminal().await;
        receipt.handle.join().await;

        assert_eq!(names(&events)[..3], ["status", "data_fetching", "training_started"]);
        assert_eq!(events.last().unwrap().event, event_names::TRAINING_COMPLETED);
        assert_eq!(orch.store().get(&id).unwrap().unwrap().status, TrainingStatus::Completed);
    }
}

#[tokio::test]
async fn test_store_error_after_training_marks_failed() {
    let store: Arc<dyn JobStore> = Arc::new(FaultyStore::new(CompleteFault::Error));
    let orch = orchestrator_with(
        Arc::new(ScriptedTrainer::succeeding()),
        OrchestratorConfig::default(),
        Some(store),
    );
    let id = SessionId::from("catastrophe");
    let (_handle, mut stream) = orch.watch(&id);

    let receipt = orch.start(id.clone(), spec(2)).unwrap();
    let events = stream.until_terminal().await;
    receipt.handle.join().await;

    let last = events.last().unwrap();
    assert_eq!(last.event, event_names::TRAINING_FAILED);
    assert_eq!(serde_json::to_value(last.phase).unwrap(), "error");
    assert!(last.payload["error"].as_str().unwrap().contains("disk full"));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let session = orch.store().get(&id).unwrap().unwrap();
    assert_eq!(session.status, TrainingStatus::Failed);
    assert!(session.metrics.is_none());
    assert!(session.error.unwrap().contains("disk full"));
    assert!(orch.list_active().unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_panic_marks_failed() {
    let store: Arc<dyn JobStore> = Arc::new(FaultyStore::new(CompleteFault::Panic));
    let orch = orchestrator_with(
        Arc::new(ScriptedTrainer::succeeding()),
        OrchestratorConfig::default(),
        Some(store),
    );
    let id = SessionId::from("panic");
    let (_handle, mut stream) = orch.watch(&id);

    let receipt = orch.start(id.clone(), spec(2)).unwrap();
    let events = stream.until_terminal().await;
    receipt.handle.join().await;

    assert_eq!(events.last().unwrap().event, event_names::TRAINING_FAILED);
    let session = orch.store().get(&id).unwrap().unwrap();
    assert_eq!(session.status, TrainingStatus::Failed);
    assert!(session.error.unwrap().contains("store exploded"));
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_real_path_failure_is_logged_for_operators() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let orch = orchestrator(Arc::new(ScriptedTrainer::failing_at(Stage::ModelBuilding)));
    let receipt = orch.submit(spec(2)).unwrap();
    receipt.handle.join().await;

    let output = logs.contents();
    let line = output
        .lines()
        .find(|l| l.contains("real_training_failed_falling_back"))
        .expect("fail-over log line");
    assert!(line.contains("model build exploded at model_building"), "{line}");
    assert!(line.contains(receipt.session_id.as_str()), "{line}");
    assert!(line.contains("ERROR"), "{line}");
}
