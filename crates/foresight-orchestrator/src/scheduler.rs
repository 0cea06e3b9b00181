//! Scheduler abstraction the orchestrator runs workers on.
//!
//! The orchestrator only needs "schedule a future" and "sleep"; the tokio
//! implementation lives here, tests may provide their own.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{OrchestratorError, Result};

/// Unit of work handed to a scheduler.
pub type Task = BoxFuture<'static, ()>;

pub trait Scheduler: Send + Sync {
    /// Runs `task` independently of the caller.
    fn spawn(&self, task: Task) -> Result<()>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Lets other tasks run before continuing.
    fn yield_now(&self) -> BoxFuture<'static, ()> {
        self.sleep(Duration::ZERO)
    }

    /// Spawns `task` and returns a handle that observes its completion.
    fn schedule(&self, task: Task) -> Result<TaskHandle> {
        let (tx, rx) = watch::channel(false);
        self.spawn(
            async move {
                task.await;
                let _ = tx.send(true);
            }
            .boxed(),
        )?;
        Ok(TaskHandle { done: rx })
    }
}

/// Completion signal of a scheduled task.
///
/// A task that is dropped without finishing (runtime shutdown, panic that
/// escaped) also counts as finished.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    done: watch::Receiver<bool>,
}

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        *self.done.borrow() || self.done.has_changed().is_err()
    }

    /// Waits until the task has finished.
    pub async fn join(mut self) {
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// Scheduler backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| OrchestratorError::Scheduler(e.to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: Task) -> Result<()> {
        drop(self.handle.spawn(task));
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if duration.is_zero() {
            tokio::task::yield_now().boxed()
        } else {
            tokio::time::sleep(duration).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_schedule_reports_completion() {
        let scheduler = TokioScheduler::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = scheduler
            .schedule(
                async move {
                    flag.store(true, Ordering::SeqCst);
                }
                .boxed(),
            )
            .unwrap();
        handle.clone().join().await;
        assert!(handle.is_finished());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_task_counts_as_finished() {
        async fn boom() {
            panic!("boom");
        }

        let scheduler = TokioScheduler::current().unwrap();
        let handle = scheduler.schedule(boom().boxed()).unwrap();
        handle.clone().join().await;
        assert!(handle.is_finished());
    }

    #[test]
    fn test_current_outside_runtime_fails() {
        assert!(matches!(TokioScheduler::current(), Err(OrchestratorError::Scheduler(_))));
    }
}
