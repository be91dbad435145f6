//! Multiplexing of concurrent streaming producers.
//!
//! Producers (for example several model completions for one prompt) run in
//! parallel, but the caller receives their output one producer at a time,
//! in the order the producers started talking.

mod multiplexer;
mod producer;

pub use multiplexer::{
    MultiplexOutput, Multiplexer, DEFAULT_WATCHDOG_INTERVAL, PRODUCER_PLACEHOLDER,
};
pub use producer::{ChunkProducer, ChunkStream, ProducerSpec, Transcripts};
