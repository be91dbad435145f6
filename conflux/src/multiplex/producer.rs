//! Streaming producers consumed by the multiplexer.

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A stream of text chunks; an `Err` ends the producer with a failure.
pub type ChunkStream = BoxStream<'static, Result<String, String>>;

/// Something that streams text, e.g. one model completion.
#[async_trait]
pub trait ChunkProducer: Send + Sync {
    /// Starts producing and returns the chunk stream.
    async fn stream(&self) -> Result<ChunkStream, String>;
}

/// A producer together with the id its output is reported under.
#[derive(Clone)]
pub struct ProducerSpec {
    /// Unique producer id (e.g. a model name).
    pub id: String,
    /// The producer itself.
    pub producer: Arc<dyn ChunkProducer>,
}

impl ProducerSpec {
    /// Creates a new producer spec.
    #[must_use]
    pub fn new(id: impl Into<String>, producer: impl ChunkProducer + 'static) -> Self {
        Self {
            id: id.into(),
            producer: Arc::new(producer),
        }
    }
}

impl std::fmt::Debug for ProducerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSpec").field("id", &self.id).finish()
    }
}

/// Full text produced by every producer, keyed by producer id.
///
/// Filled in as chunks arrive; complete once the multiplexed stream ends.
/// Injected error text is included, headers are not.
#[derive(Debug, Clone, Default)]
pub struct Transcripts {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl Transcripts {
    pub(crate) fn register(&self, id: &str) {
        self.inner.lock().entry(id.to_string()).or_default();
    }

    pub(crate) fn append(&self, id: &str, text: &str) {
        self.inner.lock().entry(id.to_string()).or_default().push_str(text);
    }

    /// Returns the text produced so far by `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<String> {
        self.inner.lock().get(id).cloned()
    }

    /// Returns a copy of every transcript.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().clone()
    }

    /// Returns the number of producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if there are no producers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
