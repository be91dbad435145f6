//! Deadline-bounded execution.
//!
//! The guard waits for a task for at most a fixed duration. When the deadline
//! passes the caller moves on, but the task is not interrupted: it runs to
//! completion in the background and its result is dropped. Work with external
//! side effects may therefore still take effect after the caller gave up.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::WorkerPool;
use crate::errors::{ConfluxError, TaskError};

/// Outcome of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    /// The work finished in time with a value.
    Completed(T),
    /// The deadline passed first.
    TimedOut,
    /// The work finished in time with an error.
    Failed(TaskError),
}

impl<T> Guarded<T> {
    /// Returns true if the work completed in time.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Guarded::Completed(_))
    }

    /// Returns true if the deadline passed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Guarded::TimedOut)
    }

    /// Returns true if the work failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Guarded::Failed(_))
    }

    /// Returns the value if the work completed in time.
    ///
    /// This collapses timeouts and failures into `None`.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Guarded::Completed(v) => Some(v),
            Guarded::TimedOut | Guarded::Failed(_) => None,
        }
    }

    /// Returns a reference to the value if the work completed in time.
    #[must_use]
    pub fn as_completed(&self) -> Option<&T> {
        match self {
            Guarded::Completed(v) => Some(v),
            Guarded::TimedOut | Guarded::Failed(_) => None,
        }
    }

    /// Transforms a completed value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Guarded<U> {
        match self {
            Guarded::Completed(v) => Guarded::Completed(f(v)),
            Guarded::TimedOut => Guarded::TimedOut,
            Guarded::Failed(e) => Guarded::Failed(e),
        }
    }

    /// Converts to a standard Result; a timeout reports `waited`.
    pub fn into_result(self, waited: Duration) -> Result<T, ConfluxError> {
        match self {
            Guarded::Completed(v) => Ok(v),
            Guarded::TimedOut => Err(ConfluxError::timeout(waited)),
            Guarded::Failed(e) => Err(e.into()),
        }
    }

    fn from_block(result: Result<T, ConfluxError>, timeout: Duration) -> Self {
        match result {
            Ok(value) => Guarded::Completed(value),
            Err(ConfluxError::Timeout { .. }) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Guarded call timed out");
                Guarded::TimedOut
            }
            Err(ConfluxError::Task(e)) => Guarded::Failed(e),
            Err(other) => Guarded::Failed(TaskError::failed(other)),
        }
    }
}

/// Runs a future on the pool and waits at most `timeout` for it.
///
/// The deadline starts once the future holds a worker slot; time spent
/// queued behind a saturated pool does not count.
pub async fn run_with_timeout<F, T, E>(pool: &WorkerPool, timeout: Duration, future: F) -> Guarded<T>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display,
{
    let mut handle = pool.submit(future);
    handle.started().await;
    Guarded::from_block(handle.block(timeout).await, timeout)
}

/// Runs a synchronous closure on the pool and waits at most `timeout` for it.
pub async fn run_blocking_with_timeout<F, T, E>(
    pool: &WorkerPool,
    timeout: Duration,
    f: F,
) -> Guarded<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let mut handle = pool.submit_blocking(f);
    handle.started().await;
    Guarded::from_block(handle.block(timeout).await, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_guarded_accessors() {
        let ok: Guarded<i32> = Guarded::Completed(42);
        assert!(ok.is_completed());
        assert_eq!(ok.as_completed(), Some(&42));
        assert_eq!(ok.clone().map(|v| v + 1), Guarded::Completed(43));
        assert_eq!(ok.into_option(), Some(42));

        let timeout: Guarded<i32> = Guarded::TimedOut;
        assert!(timeout.is_timeout());
        assert!(timeout.clone().into_result(Duration::from_secs(1)).unwrap_err().is_timeout());
        assert_eq!(timeout.into_option(), None);

        let failed: Guarded<i32> = Guarded::Failed(TaskError::failed("x"));
        assert!(failed.is_failed());
        assert_eq!(failed.into_option(), None);
    }

    #[tokio::test]
    async fn test_run_with_timeout_success() {
        let pool = WorkerPool::new(2).unwrap();
        let result = run_with_timeout(&pool, Duration::from_secs(1), async { Ok::<_, String>(5) }).await;
        assert_eq!(result, Guarded::Completed(5));
    }

    #[tokio::test]
    async fn test_run_with_timeout_failure() {
        let pool = WorkerPool::new(2).unwrap();
        let result =
            run_with_timeout(&pool, Duration::from_secs(1), async { Err::<i32, _>("boom") }).await;
        assert_eq!(result, Guarded::Failed(TaskError::Failed("boom".into())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_blocking_call_returns_promptly() {
        let pool = WorkerPool::new(2).unwrap();
        let started = Instant::now();

        let result = run_blocking_with_timeout(&pool, Duration::from_millis(100), || {
            std::thread::sleep(Duration::from_secs(2));
            Ok::<_, String>(1)
        })
        .await;

        assert!(result.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_slow_async_call_returns_promptly() {
        let pool = WorkerPool::new(2).unwrap();
        let started = Instant::now();

        let result = run_with_timeout(&pool, Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(1)
        })
        .await;

        assert!(result.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_ignores_time_queued_for_a_slot() {
        let pool = WorkerPool::new(1).unwrap();
        let mut busy = pool.submit(async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok::<_, String>(())
        });
        busy.started().await;
        let started = Instant::now();

        let result = run_with_timeout(&pool, Duration::from_millis(100), async { Ok::<_, String>(1) }).await;

        assert_eq!(result, Guarded::Completed(1));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_closed_pool_reports_rejection() {
        let pool = WorkerPool::new(1).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await);

        let result = run_with_timeout(&pool, Duration::from_millis(100), async { Ok::<_, String>(1) }).await;
        assert_eq!(result, Guarded::Failed(TaskError::Rejected));
    }
}
