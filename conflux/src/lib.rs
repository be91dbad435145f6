//! # Conflux
//!
//! Concurrency and caching building blocks for services that orchestrate
//! many slow, fallible calls (model completions, scrapers, media jobs).
//!
//! - **Worker pool and task handles**: bounded concurrent dispatch with
//!   blocking and non-blocking result retrieval
//! - **Timeout guard**: bound the wait on a task without killing it
//! - **Fan-out and pipelines**: run tasks across workers and stream results
//!   back in completion order, optionally through a second stage
//! - **Stream multiplexing**: run several streaming producers at once and
//!   emit them one complete transcript at a time
//! - **Memoization**: cache results with fixed or calendar-relative expiry
//! - **Bounded containers**: thread-safe FIFO sets and maps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conflux::prelude::*;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), ConfluxError> {
//! let pool = WorkerPool::new(DEFAULT_POOL_SIZE)?;
//!
//! let mut squares = FanOut::new(&pool)
//!     .with_max_workers(2)
//!     .with_timeout(Duration::from_secs(5))
//!     .orchestrate(|n: u64| async move { Ok::<_, String>(n * n) }, vec![2, 3]);
//!
//! let results = collect_items(&mut squares).await;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod cache;
pub mod config;
pub mod containers;
pub mod errors;
pub mod executor;
pub mod multiplex;
pub mod observability;
pub mod orchestrate;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{
        calculate_expiry, CacheMetrics, CacheStore, Expiry, InMemoryCacheStore, Memoizer,
        MemoizerBuilder, Period,
    };
    pub use crate::config::ToolkitConfig;
    pub use crate::containers::{CountedFifoSet, DefaultFifoMap, ExpiringFifoMap, UniqueFifoSet};
    pub use crate::errors::{CacheError, ConfigError, ConfluxError, TaskError};
    pub use crate::executor::{
        run_blocking_with_timeout, run_with_timeout, Guarded, TaskHandle, WorkerPool,
        DEFAULT_POOL_SIZE,
    };
    pub use crate::multiplex::{ChunkProducer, MultiplexOutput, Multiplexer, ProducerSpec};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::orchestrate::{collect_items, FanOut, Pipeline, StageMessage};
}
