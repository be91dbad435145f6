//! Memoization with fixed and calendar-relative expiry.
//!
//! A [`Memoizer`] hashes a namespace plus the (optionally filtered) call
//! arguments into a key, looks it up in a [`CacheStore`], and on a miss
//! calls the wrapped function and stores its result with a TTL derived
//! from an [`Expiry`].
//!
//! ```no_run
//! use conflux::cache::{Memoizer, Period};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let memo = Memoizer::builder("search")
//!     .key_fields(["query"])
//!     .expire(Period::Daily)
//!     .build()?;
//!
//! let results = memo
//!     .call(serde_json::json!({"query": "rust", "api_key": "secret"}), |args| async move {
//!         Ok::<_, std::io::Error>(vec![format!("result for {}", args["query"])])
//!     })
//!     .await?;
//! assert_eq!(results.len(), 1);
//! # Ok(())
//! # }
//! ```

mod expiry;
mod key;
mod memoize;
mod metrics;
mod store;

pub use expiry::{calculate_expiry, Expiry, Period};
pub use key::{derive_key, KeyFunction, KeyStrategy};
pub use memoize::{is_truthy, Memoizer, MemoizerBuilder};
pub use metrics::{CacheMetrics, CacheOp, LatencySummary, DEFAULT_METRICS_WINDOW};
pub use store::{CacheStore, InMemoryCacheStore, DEFAULT_CACHE_CAPACITY};
