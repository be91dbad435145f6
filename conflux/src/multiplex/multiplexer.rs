//! Multiplexes concurrent producers into one ordered stream.
//!
//! Every producer runs on its own worker and reports into a shared queue.
//! A single consumer decides what reaches the caller: only one producer is
//! active at a time, and the others are buffered until it finishes. The
//! caller therefore sees complete transcripts one after another, ordered by
//! when each producer emitted its first chunk.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::producer::{ProducerSpec, Transcripts};
use crate::config::ToolkitConfig;
use crate::errors::{ConfigError, ConfluxError};
use crate::executor::{TaskHandle, WorkerPool};

/// Default idle interval before the consumer checks on its workers.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);

/// Placeholder replaced by the producer id in header templates.
pub const PRODUCER_PLACEHOLDER: &str = "{producer}";

#[derive(Debug)]
enum StreamEvent {
    Chunk { id: String, text: String },
    Completed { id: String },
    Failed { id: String, error: String },
}

fn error_content(id: &str, error: &str) -> String {
    format!("Error from {id}: {error}")
}

/// Result of [`Multiplexer::multiplex`].
pub struct MultiplexOutput {
    /// Chunks in delivery order, including headers.
    pub chunks: BoxStream<'static, String>,
    /// Per-producer transcripts, complete once `chunks` is exhausted.
    pub transcripts: Transcripts,
}

impl MultiplexOutput {
    /// Drains the stream and returns the emitted chunks and the transcripts.
    pub async fn collect(self) -> (Vec<String>, HashMap<String, String>) {
        let chunks: Vec<String> = self.chunks.collect().await;
        (chunks, self.transcripts.snapshot())
    }
}

impl std::fmt::Debug for MultiplexOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexOutput")
            .field("transcripts", &self.transcripts)
            .finish_non_exhaustive()
    }
}

/// Runs several streaming producers and emits one at a time.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    pool: WorkerPool,
    header_template: Option<String>,
    watchdog_interval: Duration,
}

impl Multiplexer {
    /// Creates a multiplexer whose producers run on `pool`.
    #[must_use]
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            pool: pool.clone(),
            header_template: None,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    /// Creates a multiplexer using the configured watchdog interval.
    #[must_use]
    pub fn from_config(pool: &WorkerPool, config: &ToolkitConfig) -> Self {
        Self::new(pool).with_watchdog_interval(config.watchdog_interval())
    }

    /// Emits `template` (with `{producer}` replaced) before each producer's output.
    #[must_use]
    pub fn with_header_template(mut self, template: impl Into<String>) -> Self {
        self.header_template = Some(template.into());
        self
    }

    /// Sets how long the consumer waits on an idle queue before checking workers.
    #[must_use]
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Starts every producer and returns the multiplexed stream.
    ///
    /// Must be called within a Tokio runtime. A failing producer does not
    /// affect the others; its error text becomes its content.
    pub fn multiplex(&self, specs: Vec<ProducerSpec>) -> Result<MultiplexOutput, ConfluxError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.id.clone()) {
                return Err(ConfigError::DuplicateProducer(spec.id.clone()).into());
            }
        }

        let transcripts = Transcripts::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(specs.len());

        for spec in specs {
            transcripts.register(&spec.id);
            let tx = tx.clone();
            let id = spec.id.clone();
            let producer = spec.producer;

            let handle = self.pool.submit_labeled(Some(format!("multiplex:{id}")), async move {
                run_producer(id, producer.as_ref(), &tx).await;
                Ok::<(), String>(())
            });
            workers.push((spec.id, handle));
        }
        drop(tx);

        info!(producers = workers.len(), "Multiplexing producers");

        let consumer = Consumer {
            rx,
            total: workers.len(),
            workers,
            streaming_order: Vec::new(),
            buffers: HashMap::new(),
            completed: HashSet::new(),
            flushed: HashSet::new(),
            active: None,
            ready: VecDeque::new(),
            transcripts: transcripts.clone(),
            header_template: self.header_template.clone(),
            watchdog_interval: self.watchdog_interval,
            done: false,
        };

        let chunks = futures::stream::unfold(consumer, |mut consumer| async move {
            loop {
                if let Some(chunk) = consumer.ready.pop_front() {
                    return Some((chunk, consumer));
                }
                if consumer.done {
                    return None;
                }
                consumer.step().await;
            }
        })
        .boxed();

        Ok(MultiplexOutput { chunks, transcripts })
    }
}

async fn run_producer(
    id: String,
    producer: &dyn super::producer::ChunkProducer,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) {
    let mut stream = match producer.stream().await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = tx.send(StreamEvent::Failed { id, error });
            return;
        }
    };

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                if tx
                    .send(StreamEvent::Chunk {
                        id: id.clone(),
                        text,
                    })
                    .is_err()
                {
                    // Consumer is gone; stop producing for nobody.
                    return;
                }
            }
            Err(error) => {
                let _ = tx.send(StreamEvent::Failed { id, error });
                return;
            }
        }
    }

    let _ = tx.send(StreamEvent::Completed { id });
}

/// Consumer-side state. Exactly one producer is `active` at a time.
struct Consumer {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    total: usize,
    workers: Vec<(String, TaskHandle<()>)>,
    /// Producers in order of their first chunk.
    streaming_order: Vec<String>,
    buffers: HashMap<String, Vec<String>>,
    completed: HashSet<String>,
    /// Producers whose whole output has been handed to the caller.
    flushed: HashSet<String>,
    active: Option<String>,
    ready: VecDeque<String>,
    transcripts: Transcripts,
    header_template: Option<String>,
    watchdog_interval: Duration,
    done: bool,
}

impl Consumer {
    async fn step(&mut self) {
        if self.completed.len() >= self.total {
            self.finish();
            return;
        }

        match tokio::time::timeout(self.watchdog_interval, self.rx.recv()).await {
            Ok(Some(event)) => self.handle(event),
            Ok(None) => {
                // Every worker dropped its sender.
                self.reap_workers(true).await;
                self.finish();
            }
            Err(_) => self.reap_workers(false).await,
        }
    }

    fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk { id, text } => self.on_chunk(&id, text),
            StreamEvent::Completed { id } => {
                debug!(producer = %id, "Producer completed");
                self.on_complete(&id);
            }
            StreamEvent::Failed { id, error } => {
                error!(producer = %id, error = %error, "Producer failed");
                self.on_chunk(&id, error_content(&id, &error));
                self.on_complete(&id);
            }
        }
    }

    fn on_chunk(&mut self, id: &str, text: String) {
        if self.completed.contains(id) {
            return;
        }
        self.transcripts.append(id, &text);
        if !self.streaming_order.iter().any(|p| p == id) {
            self.streaming_order.push(id.to_string());
        }

        match self.active.as_deref() {
            None => {
                self.activate(id);
                self.ready.push_back(text);
            }
            Some(active) if active == id => self.ready.push_back(text),
            Some(_) => self.buffers.entry(id.to_string()).or_default().push(text),
        }
    }

    fn on_complete(&mut self, id: &str) {
        if !self.completed.insert(id.to_string()) {
            return;
        }
        if self.active.as_deref() == Some(id) {
            self.flushed.insert(id.to_string());
            self.active = None;
            self.advance();
        }
    }

    /// Makes `id` the active producer and releases anything it buffered.
    fn activate(&mut self, id: &str) {
        if let Some(template) = &self.header_template {
            self.ready.push_back(template.replace(PRODUCER_PLACEHOLDER, id));
        }
        if let Some(buffered) = self.buffers.remove(id) {
            self.ready.extend(buffered);
        }
        self.active = Some(id.to_string());
    }

    /// Hands the caller the next producers in first-chunk order.
    ///
    /// Finished producers are flushed whole; the first unfinished one
    /// becomes active.
    fn advance(&mut self) {
        let pending: Vec<String> = self
            .streaming_order
            .iter()
            .filter(|p| !self.flushed.contains(*p))
            .cloned()
            .collect();

        for id in pending {
            self.activate(&id);
            if self.completed.contains(&id) {
                self.flushed.insert(id);
                self.active = None;
            } else {
                debug!(producer = %id, "Switched active producer");
                return;
            }
        }
    }

    /// Marks producers whose worker ended without a completion event.
    async fn reap_workers(&mut self, all: bool) {
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.workers.len() {
            if all || self.workers[index].1.is_finished() {
                finished.push(self.workers.swap_remove(index));
            } else {
                index += 1;
            }
        }

        for (id, handle) in finished {
            if self.completed.contains(&id) {
                continue;
            }
            let outcome = handle.wait().await;
            // The worker is done, so everything it sent is already queued.
            while let Ok(event) = self.rx.try_recv() {
                self.handle(event);
            }
            if self.completed.contains(&id) {
                continue;
            }

            match outcome {
                Ok(()) => warn!(producer = %id, "Producer exited without completion signal"),
                Err(e) => {
                    warn!(producer = %id, error = %e, "Producer worker failed");
                    self.on_chunk(&id, error_content(&id, &e.to_string()));
                }
            }
            self.on_complete(&id);
        }
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        if self.active.is_none() {
            self.advance();
        }
        self.done = true;
        info!(producers = self.total, "Multiplexing finished");
    }
}
