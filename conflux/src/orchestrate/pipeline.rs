//! Two-stage concurrent pipeline built from two fan-outs.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::fanout::{FanOut, TaskCallback, DEFAULT_MAX_WORKERS, DEFAULT_TASK_TIMEOUT};
use super::message::StageReceiver;
use crate::config::ToolkitConfig;
use crate::executor::{Guarded, WorkerPool};

/// Chains two fan-outs so stage two consumes stage one's queue as it fills.
///
/// Stage two starts working on the first stage-one result while stage one is
/// still running, so end-to-end order follows stage-one completion order.
/// The output queue ends with `EndOfStream` then `StageFinished`.
pub struct Pipeline<M, T> {
    pool: WorkerPool,
    max_workers: usize,
    stage1_timeout: Duration,
    stage2_timeout: Duration,
    callback: Option<TaskCallback<M, T>>,
}

impl<M, T> Pipeline<M, T>
where
    M: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates a pipeline running both stages on `pool`.
    #[must_use]
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            pool: pool.clone(),
            max_workers: DEFAULT_MAX_WORKERS,
            stage1_timeout: DEFAULT_TASK_TIMEOUT,
            stage2_timeout: DEFAULT_TASK_TIMEOUT,
            callback: None,
        }
    }

    /// Creates a pipeline using the configured bounds.
    #[must_use]
    pub fn from_config(pool: &WorkerPool, config: &ToolkitConfig) -> Self {
        Self::new(pool)
            .with_max_workers(config.fanout_max_workers)
            .with_timeouts(config.fanout_timeout(), config.stage_timeout())
    }

    /// Sets the worker bound of each stage.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets the per-task timeouts of stage one and stage two.
    #[must_use]
    pub fn with_timeouts(mut self, stage1: Duration, stage2: Duration) -> Self {
        self.stage1_timeout = stage1;
        self.stage2_timeout = stage2;
        self
    }

    /// Sets a callback applied to every completed stage-two result.
    ///
    /// The callback receives the stage-one value that produced the result.
    #[must_use]
    pub fn with_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(T, &M) -> T + Send + Sync + 'static,
    {
        self.callback = Some(std::sync::Arc::new(callback));
        self
    }

    /// Runs `stage1` over `tasks` and feeds each completed value to `stage2`.
    pub fn run<A, F1, Fut1, E1, F2, Fut2, E2>(
        &self,
        stage1: F1,
        stage2: F2,
        tasks: Vec<A>,
    ) -> StageReceiver<Guarded<T>>
    where
        A: Clone + Send + Sync + 'static,
        F1: Fn(A) -> Fut1 + Send + Sync + 'static,
        Fut1: Future<Output = Result<M, E1>> + Send + 'static,
        E1: Display,
        F2: Fn(M) -> Fut2 + Send + Sync + 'static,
        Fut2: Future<Output = Result<T, E2>> + Send + 'static,
        E2: Display,
    {
        let first = FanOut::<A, M>::new(&self.pool)
            .with_max_workers(self.max_workers)
            .with_timeout(self.stage1_timeout)
            .orchestrate(stage1, tasks);

        let mut second = FanOut::<M, T>::new(&self.pool)
            .with_max_workers(self.max_workers)
            .with_timeout(self.stage2_timeout);
        if let Some(ref callback) = self.callback {
            let callback = callback.clone();
            second = second.with_callback(move |value, input: &M| callback(value, input));
        }

        second.orchestrate_queue(stage2, first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrate::message::{drain_all, StageMessage};
    use std::time::Instant;

    #[tokio::test]
    async fn test_two_stage_pipeline() {
        let pool = WorkerPool::new(16).unwrap();
        let rx = Pipeline::new(&pool).run(
            |x: i64| async move { Ok::<_, String>(x + 1) },
            |y: i64| async move { Ok::<_, String>(y * 10) },
            vec![1, 2, 3],
        );

        let messages = drain_all(rx).await;
        assert_eq!(messages.len(), 5);

        let mut values: Vec<i64> = messages
            .iter()
            .filter_map(|m| m.as_item().and_then(Guarded::as_completed).copied())
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![20, 30, 40]);
        assert_eq!(messages[3], StageMessage::EndOfStream);
        assert_eq!(messages[4], StageMessage::StageFinished);
    }

    #[tokio::test]
    async fn test_stage_two_starts_before_stage_one_finishes() {
        let pool = WorkerPool::new(16).unwrap();
        let started = Instant::now();

        let mut rx = Pipeline::new(&pool).run(
            |delay_ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, String>(delay_ms)
            },
            |v: u64| async move { Ok::<_, String>(v) },
            vec![10, 400],
        );

        let first = rx.recv().await.and_then(StageMessage::into_item);
        assert_eq!(first, Some(Guarded::Completed(10)));
        assert!(started.elapsed() < Duration::from_millis(300));
        drain_all(rx).await;
    }

    #[tokio::test]
    async fn test_stage_one_failures_are_forwarded() {
        let pool = WorkerPool::new(16).unwrap();
        let rx = Pipeline::new(&pool)
            .with_callback(|value: String, input: &i64| format!("{input}:{value}"))
            .run(
                |x: i64| async move {
                    if x < 0 {
                        Err("negative".to_string())
                    } else {
                        Ok(x)
                    }
                },
                |v: i64| async move { Ok::<_, String>(format!("v{v}")) },
                vec![-1, 5],
            );

        let items: Vec<Guarded<String>> = drain_all(rx)
            .await
            .into_iter()
            .filter_map(StageMessage::into_item)
            .collect();

        assert_eq!(items.len(), 2);
        assert!(items.iter().any(Guarded::is_failed));
        assert!(items.contains(&Guarded::Completed("5:v5".to_string())));
    }

    #[tokio::test]
    async fn test_stage_two_timeout() {
        let pool = WorkerPool::new(16).unwrap();
        let rx = Pipeline::new(&pool)
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(30))
            .run(
                |x: u64| async move { Ok::<_, String>(x) },
                |x: u64| async move {
                    tokio::time::sleep(Duration::from_millis(x)).await;
                    Ok::<_, String>(x)
                },
                vec![1, 1_000],
            );

        let items: Vec<Guarded<u64>> =
            drain_all(rx).await.into_iter().filter_map(StageMessage::into_item).collect();
        assert!(items.contains(&Guarded::Completed(1)));
        assert!(items.contains(&Guarded::TimedOut));
    }
}
