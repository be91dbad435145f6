//! Shared bounded worker pool and the handles it returns.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ToolkitConfig;
use crate::errors::{ConfigError, ConfluxError, TaskError};

/// Default number of concurrently running tasks.
pub const DEFAULT_POOL_SIZE: usize = 256;

/// Submission metadata carried by every handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Unique task id.
    pub id: Uuid,
    /// Optional human-readable label used in logs.
    pub label: Option<String>,
    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl TaskMeta {
    fn new(label: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            submitted_at: Utc::now(),
        }
    }
}

/// Observable state of a task handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Still queued or running.
    Pending,
    /// Finished with a value.
    Done,
    /// Finished with an error.
    Errored,
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

/// A bounded pool that runs submitted work on the Tokio runtime.
///
/// The pool is a cheap handle; clone it and pass it to every orchestrator
/// that should share the same concurrency budget. Work that is no longer
/// awaited keeps running to completion: there is no cancellation.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a pool that runs at most `capacity` tasks at once.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Self {
            inner: Arc::new(PoolInner::new(capacity)),
        })
    }

    /// Creates a pool sized from the toolkit configuration.
    pub fn from_config(config: &ToolkitConfig) -> Result<Self, ConfigError> {
        Self::new(config.pool_size)
    }

    /// Returns the maximum number of concurrently running tasks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of tasks currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the number of free worker slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Submits a future. Must be called within a Tokio runtime.
    ///
    /// Errors and panics raised by the future are captured on the handle and
    /// never propagate into the runtime.
    pub fn submit<F, T, E>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display,
    {
        self.submit_labeled(None, future)
    }

    /// Submits a future with a label used in log output.
    pub fn submit_labeled<F, T, E>(&self, label: Option<String>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display,
    {
        let work = async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::failed(e)),
                Err(payload) => Err(TaskError::from_panic(payload.as_ref())),
            }
        };
        self.dispatch(TaskMeta::new(label), work)
    }

    /// Submits a synchronous closure, run on Tokio's blocking thread pool.
    pub fn submit_blocking<F, T, E>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let work = async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::failed(e)),
                Err(join) if join.is_panic() => Err(TaskError::from_panic(join.into_panic().as_ref())),
                Err(_) => Err(TaskError::Abandoned),
            }
        };
        self.dispatch(TaskMeta::new(None), work)
    }

    fn dispatch<W, T>(&self, meta: TaskMeta, work: W) -> TaskHandle<T>
    where
        W: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let (started_tx, started_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task_id = meta.id;
        let label = meta.label.clone().unwrap_or_default();

        if inner.closed.load(Ordering::SeqCst) {
            warn!(task_id = %task_id, label = %label, "Task rejected: pool is closed");
            let _ = tx.send(Err(TaskError::Rejected));
            return TaskHandle::new(meta, rx, None);
        }

        tokio::spawn(async move {
            let Ok(_permit) = inner.semaphore.clone().acquire_owned().await else {
                warn!(task_id = %task_id, label = %label, "Task rejected: pool is closed");
                let _ = tx.send(Err(TaskError::Rejected));
                return;
            };

            let _ = started_tx.send(());
            inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let outcome = work.await;
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Err(ref e) = outcome {
                error!(task_id = %task_id, label = %label, error = %e, "Task failed");
            }

            // The submitter may have stopped waiting; the result is then discarded.
            if tx.send(outcome).is_err() {
                debug!(task_id = %task_id, label = %label, "Result discarded, nobody waiting");
            }
        });

        TaskHandle::new(meta, rx, Some(started_rx))
    }

    /// Stops accepting work and waits up to `timeout` for running tasks.
    ///
    /// New submissions are rejected from the moment this is called; work
    /// accepted earlier still runs. Returns true if all of it finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closed.store(true, Ordering::SeqCst);
        let capacity = u32::try_from(self.inner.capacity).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(timeout, self.inner.semaphore.acquire_many(capacity))
            .await
            .map(|permit| permit.is_ok())
            .unwrap_or(false);

        self.inner.semaphore.close();
        if !drained {
            warn!(in_flight = self.in_flight(), "Worker pool shut down with tasks still running");
        }
        drained
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(PoolInner::new(DEFAULT_POOL_SIZE)),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A handle to work scheduled on a [`WorkerPool`].
///
/// Exactly one of a value or an error is eventually produced. Dropping the
/// handle abandons the result but does not stop the work.
pub struct TaskHandle<T> {
    meta: TaskMeta,
    rx: oneshot::Receiver<Result<T, TaskError>>,
    started: Option<oneshot::Receiver<()>>,
    settled: Option<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    fn new(
        meta: TaskMeta,
        rx: oneshot::Receiver<Result<T, TaskError>>,
        started: Option<oneshot::Receiver<()>>,
    ) -> Self {
        Self {
            meta,
            rx,
            started,
            settled: None,
        }
    }

    /// Waits until the task holds a worker slot, or can no longer get one.
    pub async fn started(&mut self) {
        if let Some(started) = self.started.as_mut() {
            let _ = started.await;
            self.started = None;
        }
    }

    /// Returns the submission metadata.
    #[must_use]
    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Returns the current state without blocking.
    pub fn state(&mut self) -> TaskState {
        self.settle();
        match self.settled {
            None => TaskState::Pending,
            Some(Ok(_)) => TaskState::Done,
            Some(Err(_)) => TaskState::Errored,
        }
    }

    /// Returns true once the task has finished either way.
    pub fn is_finished(&mut self) -> bool {
        self.state() != TaskState::Pending
    }

    fn settle(&mut self) {
        if self.settled.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.settled = Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settled = Some(Err(TaskError::Abandoned));
            }
        }
    }

    /// Waits for the task without a deadline.
    pub async fn wait(mut self) -> Result<T, TaskError> {
        if let Some(outcome) = self.settled.take() {
            return outcome;
        }
        self.rx.await.unwrap_or(Err(TaskError::Abandoned))
    }

    /// Waits up to `timeout` for the result.
    ///
    /// Returns [`ConfluxError::Timeout`] if the deadline passes first; the
    /// task itself keeps running.
    pub async fn block(mut self, timeout: Duration) -> Result<T, ConfluxError> {
        if let Some(outcome) = self.settled.take() {
            return outcome.map_err(ConfluxError::from);
        }
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome.map_err(ConfluxError::from),
            Ok(Err(_)) => Err(TaskError::Abandoned.into()),
            Err(_) => {
                warn!(task_id = %self.meta.id, waited_ms = timeout.as_millis() as u64, "Gave up waiting for task");
                Err(ConfluxError::timeout(timeout))
            }
        }
    }

    /// Like [`block`](Self::block), but returns the error as data.
    ///
    /// Returns `None` if the task succeeded; the value is discarded.
    pub async fn block_for_error(self, timeout: Duration) -> Option<ConfluxError> {
        self.block(timeout).await.err()
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("meta", &self.meta)
            .field("settled", &self.settled.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_submit_and_block() {
        let pool = WorkerPool::new(4).unwrap();
        let handle = pool.submit(async { Ok::<_, String>(21 * 2) });

        assert_eq!(handle.block(Duration::from_secs(1)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_captured_on_handle() {
        let pool = WorkerPool::new(4).unwrap();
        let handle = pool.submit(async { Err::<i32, _>("bad input") });

        let err = handle.block(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ConfluxError::Task(TaskError::Failed(ref m)) if m == "bad input"));
    }

    #[tokio::test]
    async fn test_panic_captured_on_handle() {
        let pool = WorkerPool::new(4).unwrap();
        let handle = pool.submit(async {
            if true {
                panic!("exploded");
            }
            Ok::<i32, String>(1)
        });

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, TaskError::Panicked("exploded".into()));
    }

    #[tokio::test]
    async fn test_block_times_out_but_work_continues() {
        let pool = WorkerPool::new(4).unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let handle = pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, String>(())
        });

        let err = handle.block(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_block_for_error() {
        let pool = WorkerPool::new(4).unwrap();

        let ok = pool.submit(async { Ok::<_, String>(1) });
        assert!(ok.block_for_error(Duration::from_secs(1)).await.is_none());

        let failing = pool.submit(async { Err::<i32, _>("nope") });
        let err = failing.block_for_error(Duration::from_secs(1)).await;
        assert!(matches!(err, Some(ConfluxError::Task(_))));

        let slow = pool.submit(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(1)
        });
        let err = slow.block_for_error(Duration::from_millis(10)).await;
        assert!(err.is_some_and(|e| e.is_timeout()));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let mut handle = pool.submit(async move {
            let _ = release_rx.await;
            Ok::<_, String>("done")
        });
        assert_eq!(handle.state(), TaskState::Pending);

        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), TaskState::Done);
        assert!(handle.is_finished());
        assert_eq!(handle.wait().await.unwrap(), "done");

        let mut failed = pool.submit(async { Err::<(), _>("x") });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failed.state(), TaskState::Errored);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2).unwrap();
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let peak = peak.clone();
                let current = current.clone();
                pool.submit(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
            })
            .collect();

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_blocking() {
        let pool = WorkerPool::default();
        let handle = pool.submit_blocking(|| {
            std::thread::sleep(Duration::from_millis(10));
            Ok::<_, String>(7)
        });
        assert_eq!(handle.wait().await.unwrap(), 7);

        let panicking = pool.submit_blocking(|| -> Result<(), String> { panic!("sync boom") });
        assert_eq!(panicking.wait().await.unwrap_err(), TaskError::Panicked("sync boom".into()));
    }

    #[tokio::test]
    async fn test_started_waits_for_a_free_slot() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut busy = pool.submit(async move {
            let _ = release_rx.await;
            Ok::<_, String>(())
        });
        busy.started().await;

        let mut queued = pool.submit(async { Ok::<_, String>(2) });
        let waited = tokio::time::timeout(Duration::from_millis(50), queued.started()).await;
        assert!(waited.is_err());

        release_tx.send(()).unwrap();
        queued.started().await;
        assert_eq!(queued.wait().await.unwrap(), 2);
        busy.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(async { Ok::<_, String>(()) }).wait().await.unwrap();

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(pool.is_closed());

        let rejected = pool.submit(async { Ok::<_, String>(()) });
        assert_eq!(rejected.wait().await.unwrap_err(), TaskError::Rejected);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_work_while_draining() {
        let pool = WorkerPool::new(1).unwrap();
        let mut running = pool.submit(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>(1)
        });
        running.started().await;

        let closer = pool.clone();
        let shutdown = tokio::spawn(async move { closer.shutdown(Duration::from_secs(1)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.is_closed());

        let late = pool.submit(async { Ok::<_, String>(2) });
        assert_eq!(late.wait().await.unwrap_err(), TaskError::Rejected);
        assert_eq!(running.wait().await.unwrap(), 1);
        assert!(shutdown.await.unwrap());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(WorkerPool::new(0).unwrap_err(), ConfigError::InvalidCapacity);
    }
}
