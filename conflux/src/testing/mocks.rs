//! Scripted producers and call counters for tests.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::multiplex::{ChunkProducer, ChunkStream};

/// A producer that replays a fixed script of delayed chunks.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProducer {
    steps: Vec<(Duration, Option<String>)>,
    failure: Option<String>,
    starts: Arc<AtomicUsize>,
}

impl ScriptedProducer {
    /// Creates an empty script, which completes immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `text` after waiting `delay`.
    #[must_use]
    pub fn chunk_after(mut self, delay: Duration, text: impl Into<String>) -> Self {
        self.steps.push((delay, Some(text.into())));
        self
    }

    /// Waits `delay` without emitting anything.
    #[must_use]
    pub fn pause(mut self, delay: Duration) -> Self {
        self.steps.push((delay, None));
        self
    }

    /// Ends the script with a failure instead of completing.
    #[must_use]
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.failure = Some(error.into());
        self
    }

    /// Returns how many times the producer was started.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkProducer for ScriptedProducer {
    async fn stream(&self) -> Result<ChunkStream, String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let state = (self.steps.clone().into_iter(), self.failure.clone());

        let stream = futures::stream::unfold(state, |(mut steps, failure)| async move {
            while let Some((delay, text)) = steps.next() {
                tokio::time::sleep(delay).await;
                if let Some(text) = text {
                    return Some((Ok(text), (steps, failure)));
                }
            }
            failure.map(|error| (Err(error), (steps, None)))
        });

        Ok(stream.boxed())
    }
}

/// Counts calls and remembers their arguments.
#[derive(Debug, Clone, Default)]
pub struct CountingFn {
    calls: Arc<AtomicUsize>,
    arguments: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl CountingFn {
    /// Creates a new counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call.
    pub fn record(&self, args: serde_json::Value) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arguments.lock().push(args);
    }

    /// Returns the number of recorded calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the recorded arguments.
    #[must_use]
    pub fn arguments(&self) -> Vec<serde_json::Value> {
        self.arguments.lock().clone()
    }
}
