//! Fan-out orchestration over a bounded set of workers.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::message::{stage_channel, StageMessage, StageReceiver, StageSender};
use crate::config::ToolkitConfig;
use crate::errors::TaskError;
use crate::executor::{run_with_timeout, Guarded, WorkerPool};

/// Default per-invocation worker bound.
pub const DEFAULT_MAX_WORKERS: usize = 32;

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Post-processes a completed result together with the task's arguments.
pub type TaskCallback<A, T> = Arc<dyn Fn(T, &A) -> T + Send + Sync>;

/// Kind of outcome, tallied for the completion log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeKind {
    Completed,
    TimedOut,
    Failed,
}

impl<T> From<&Guarded<T>> for OutcomeKind {
    fn from(outcome: &Guarded<T>) -> Self {
        match outcome {
            Guarded::Completed(_) => Self::Completed,
            Guarded::TimedOut => Self::TimedOut,
            Guarded::Failed(_) => Self::Failed,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    timed_out: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Completed => self.completed += 1,
            OutcomeKind::TimedOut => self.timed_out += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
    }
}

/// Runs one task through the timeout guard and the optional callback.
struct TaskRunner<A, T, F> {
    pool: WorkerPool,
    timeout: Duration,
    task_fn: F,
    callback: Option<TaskCallback<A, T>>,
}

impl<A, T, F, Fut, E> TaskRunner<A, T, F>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display,
{
    async fn run(&self, args: A) -> Guarded<T> {
        let outcome = run_with_timeout(&self.pool, self.timeout, (self.task_fn)(args.clone())).await;

        match (outcome, &self.callback) {
            (Guarded::Completed(value), Some(callback)) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| callback(value, &args))) {
                    Ok(transformed) => Guarded::Completed(transformed),
                    Err(payload) => {
                        let err = TaskError::from_panic(payload.as_ref());
                        error!(error = %err, "Fan-out callback panicked");
                        Guarded::Failed(err)
                    }
                }
            }
            (outcome, _) => outcome,
        }
    }
}

/// Spawns one worker that runs `args` and publishes its outcome.
fn spawn_worker<A, T, F, Fut, E>(
    workers: &mut JoinSet<OutcomeKind>,
    runner: &Arc<TaskRunner<A, T, F>>,
    permit: tokio::sync::OwnedSemaphorePermit,
    args: A,
    tx: &StageSender<Guarded<T>>,
) where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display,
{
    let runner = runner.clone();
    let tx = tx.clone();
    workers.spawn(async move {
        let outcome = runner.run(args).await;
        let kind = OutcomeKind::from(&outcome);
        // A dropped receiver means nobody is listening any more.
        let _ = tx.send(StageMessage::Item(outcome));
        drop(permit);
        kind
    });
}

async fn join_workers(workers: &mut JoinSet<OutcomeKind>) -> Tally {
    let mut tally = Tally::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(kind) => tally.record(kind),
            Err(e) => {
                error!(error = %e, "Fan-out worker did not report");
                tally.record(OutcomeKind::Failed);
            }
        }
    }
    tally
}

/// Fans a list of tasks out across a bounded set of workers.
///
/// Each result is published on the output queue as soon as it completes, so
/// the queue is ordered by completion, not by submission. Timeouts and
/// failures are published too, as [`Guarded::TimedOut`] and
/// [`Guarded::Failed`], so nothing is silently dropped.
pub struct FanOut<A, T> {
    pool: WorkerPool,
    max_workers: usize,
    timeout: Duration,
    drain_stages: usize,
    callback: Option<TaskCallback<A, T>>,
}

impl<A, T> FanOut<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates a fan-out that runs its tasks on `pool`.
    #[must_use]
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            pool: pool.clone(),
            max_workers: DEFAULT_MAX_WORKERS,
            timeout: DEFAULT_TASK_TIMEOUT,
            drain_stages: 2,
            callback: None,
        }
    }

    /// Creates a fan-out using the configured bounds.
    #[must_use]
    pub fn from_config(pool: &WorkerPool, config: &ToolkitConfig) -> Self {
        Self::new(pool)
            .with_max_workers(config.fanout_max_workers)
            .with_timeout(config.fanout_timeout())
            .with_drain_stages(config.drain_stages)
    }

    /// Sets the worker bound. Zero is treated as one.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets the per-task timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many `StageFinished` markers close the queue.
    ///
    /// Use one per consumer that drains the queue to its end.
    #[must_use]
    pub fn with_drain_stages(mut self, stages: usize) -> Self {
        self.drain_stages = stages;
        self
    }

    /// Sets a callback applied to every completed result.
    #[must_use]
    pub fn with_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(T, &A) -> T + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn runner<F>(&self, task_fn: F) -> Arc<TaskRunner<A, T, F>> {
        Arc::new(TaskRunner {
            pool: self.pool.clone(),
            timeout: self.timeout,
            task_fn,
            callback: self.callback.clone(),
        })
    }

    /// Runs every task and returns the output queue.
    ///
    /// The queue yields one `Item` per task in completion order, then
    /// `drain_stages` `StageFinished` markers, then closes.
    pub fn orchestrate<F, Fut, E>(&self, task_fn: F, tasks: Vec<A>) -> StageReceiver<Guarded<T>>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display,
    {
        let (tx, rx) = stage_channel();
        let runner = self.runner(task_fn);
        let limiter = Arc::new(Semaphore::new(self.max_workers));
        let drain_stages = self.drain_stages;
        let max_workers = self.max_workers;

        tokio::spawn(async move {
            let started = Instant::now();
            let task_count = tasks.len();
            info!(tasks = task_count, max_workers, "Fan-out started");

            let mut workers = JoinSet::new();
            for args in tasks {
                let Ok(permit) = limiter.clone().acquire_owned().await else {
                    break;
                };
                spawn_worker(&mut workers, &runner, permit, args, &tx);
            }

            let tally = join_workers(&mut workers).await;
            for _ in 0..drain_stages {
                let _ = tx.send(StageMessage::StageFinished);
            }

            info!(
                tasks = task_count,
                completed = tally.completed,
                timed_out = tally.timed_out,
                failed = tally.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fan-out finished"
            );
        });

        rx
    }

    /// Consumes `input` as it arrives, running each completed item as a task.
    ///
    /// Input items that already timed out or failed are forwarded unchanged.
    /// Consumption stops at the first `EndOfStream` or `StageFinished` marker
    /// (or when the input closes); once every worker has reported, the queue
    /// receives `EndOfStream` followed by `StageFinished`.
    pub fn orchestrate_queue<F, Fut, E>(
        &self,
        task_fn: F,
        mut input: StageReceiver<Guarded<A>>,
    ) -> StageReceiver<Guarded<T>>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display,
    {
        let (tx, rx) = stage_channel();
        let runner = self.runner(task_fn);
        let limiter = Arc::new(Semaphore::new(self.max_workers));

        tokio::spawn(async move {
            let started = Instant::now();
            let mut received = 0_usize;
            let mut forwarded = 0_usize;
            let mut workers = JoinSet::new();

            while let Some(message) = input.recv().await {
                let args = match message {
                    StageMessage::Item(Guarded::Completed(args)) => args,
                    StageMessage::Item(Guarded::TimedOut) => {
                        forwarded += 1;
                        let _ = tx.send(StageMessage::Item(Guarded::TimedOut));
                        continue;
                    }
                    StageMessage::Item(Guarded::Failed(e)) => {
                        forwarded += 1;
                        let _ = tx.send(StageMessage::Item(Guarded::Failed(e)));
                        continue;
                    }
                    StageMessage::EndOfStream | StageMessage::StageFinished => {
                        debug!("Queue stage saw end of input");
                        break;
                    }
                };

                received += 1;
                let Ok(permit) = limiter.clone().acquire_owned().await else {
                    break;
                };
                spawn_worker(&mut workers, &runner, permit, args, &tx);
            }

            let tally = join_workers(&mut workers).await;
            let _ = tx.send(StageMessage::EndOfStream);
            let _ = tx.send(StageMessage::StageFinished);

            info!(
                received,
                forwarded,
                completed = tally.completed,
                timed_out = tally.timed_out,
                failed = tally.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Queue stage finished"
            );
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrate::message::{collect_items, drain_all};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn square(x: i64) -> Result<i64, String> {
        Ok(x * x)
    }

    #[tokio::test]
    async fn test_orchestrate_squares() {
        let pool = WorkerPool::new(8).unwrap();
        let rx = FanOut::new(&pool)
            .with_max_workers(2)
            .with_timeout(Duration::from_secs(5))
            .orchestrate(square, vec![2, 3]);

        let messages = drain_all(rx).await;
        assert_eq!(messages.len(), 4);

        let mut values: Vec<i64> = messages[..2]
            .iter()
            .map(|m| *m.as_item().and_then(Guarded::as_completed).unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![4, 9]);
        assert_eq!(messages[2], StageMessage::StageFinished);
        assert_eq!(messages[3], StageMessage::StageFinished);
    }

    #[tokio::test]
    async fn test_exactly_two_markers_then_closed() {
        let pool = WorkerPool::new(8).unwrap();
        let tasks: Vec<i64> = (0..20).collect();
        let mut rx = FanOut::new(&pool).orchestrate(square, tasks);

        let items = collect_items(&mut rx).await;
        assert_eq!(items.len(), 20);
        assert_eq!(rx.recv().await, Some(StageMessage::StageFinished));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let pool = WorkerPool::new(2).unwrap();
        let rx = FanOut::<i64, i64>::new(&pool).orchestrate(square, Vec::new());

        let messages = drain_all(rx).await;
        assert_eq!(messages, vec![StageMessage::StageFinished, StageMessage::StageFinished]);
    }

    #[tokio::test]
    async fn test_drain_stages_is_configurable() {
        let pool = WorkerPool::new(2).unwrap();
        let rx = FanOut::new(&pool).with_drain_stages(3).orchestrate(square, vec![1]);

        let markers = drain_all(rx).await.into_iter().filter(StageMessage::is_terminal).count();
        assert_eq!(markers, 3);
    }

    #[tokio::test]
    async fn test_completion_order() {
        let pool = WorkerPool::new(8).unwrap();
        let rx = FanOut::new(&pool).orchestrate(
            |delay_ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, String>(delay_ms)
            },
            vec![150, 10, 80],
        );

        let values: Vec<u64> = drain_all(rx)
            .await
            .into_iter()
            .filter_map(|m| m.into_item().and_then(Guarded::into_option))
            .collect();
        assert_eq!(values, vec![10, 80, 150]);
    }

    #[tokio::test]
    async fn test_queued_tasks_are_not_timed_out_by_a_busy_pool() {
        let pool = WorkerPool::new(1).unwrap();
        let rx = FanOut::new(&pool)
            .with_max_workers(4)
            .with_timeout(Duration::from_millis(100))
            .orchestrate(
                |n: u64| async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Ok::<_, String>(n)
                },
                vec![1, 2, 3, 4],
            );

        let mut values: Vec<u64> = drain_all(rx)
            .await
            .into_iter()
            .filter_map(|m| m.into_item().and_then(Guarded::into_option))
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_are_published() {
        let pool = WorkerPool::new(8).unwrap();
        let rx = FanOut::new(&pool)
            .with_timeout(Duration::from_millis(50))
            .orchestrate(
                |x: i64| async move {
                    match x {
                        0 => Err("zero".to_string()),
                        1 => {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            Ok(1)
                        }
                        _ => Ok(x),
                    }
                },
                vec![0, 1, 2],
            );

        let mut rx = rx;
        let items = collect_items(&mut rx).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().filter(|o| o.is_failed()).count(), 1);
        assert_eq!(items.iter().filter(|o| o.is_timeout()).count(), 1);
        assert!(items.contains(&Guarded::Completed(2)));
    }

    #[tokio::test]
    async fn test_callback_sees_arguments() {
        let pool = WorkerPool::new(4).unwrap();
        let rx = FanOut::new(&pool)
            .with_callback(|result: i64, args: &i64| result + *args)
            .orchestrate(square, vec![3]);

        let messages = drain_all(rx).await;
        assert_eq!(messages[0], StageMessage::Item(Guarded::Completed(12)));
    }

    #[tokio::test]
    async fn test_worker_bound_respected() {
        let pool = WorkerPool::new(64).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (c, p) = (current.clone(), peak.clone());
        let rx = FanOut::new(&pool).with_max_workers(3).orchestrate(
            move |_: usize| {
                let (c, p) = (c.clone(), p.clone());
                async move {
                    let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            },
            (0..12).collect(),
        );

        drain_all(rx).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_orchestrate_queue() {
        let pool = WorkerPool::new(8).unwrap();
        let (tx, input) = stage_channel();
        let rx = FanOut::new(&pool).orchestrate_queue(square, input);

        tx.send(StageMessage::Item(Guarded::Completed(4))).unwrap();
        tx.send(StageMessage::Item(Guarded::TimedOut)).unwrap();
        tx.send(StageMessage::EndOfStream).unwrap();
        tx.send(StageMessage::Item(Guarded::Completed(100))).unwrap();

        let messages = drain_all(rx).await;
        assert_eq!(messages.len(), 4);
        assert!(messages.contains(&StageMessage::Item(Guarded::Completed(16))));
        assert!(messages.contains(&StageMessage::Item(Guarded::TimedOut)));
        assert_eq!(messages[2], StageMessage::EndOfStream);
        assert_eq!(messages[3], StageMessage::StageFinished);
    }
}
