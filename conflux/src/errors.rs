//! Error types for the conflux toolkit.
//!
//! Waiting failures (timeouts) are kept distinct from failures raised by the
//! scheduled work itself, and configuration mistakes are reported eagerly at
//! construction time rather than on first use.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for conflux operations.
#[derive(Debug, Error)]
pub enum ConfluxError {
    /// The waited-for operation did not complete in the allotted time.
    ///
    /// The underlying work is not cancelled; only the wait is abandoned.
    #[error("Timed out after {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The scheduled work failed.
    #[error("{0}")]
    Task(#[from] TaskError),

    /// A configuration value was rejected.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A cache backend error.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// The multiplexer could not be started.
    #[error("Multiplex error: {0}")]
    Multiplex(String),
}

impl ConfluxError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(waited: Duration) -> Self {
        Self::Timeout { waited }
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A failure captured from scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The work returned an error.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The work panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The worker went away without reporting a result.
    #[error("Task abandoned before reporting a result")]
    Abandoned,

    /// The pool was shut down before the task could start.
    #[error("Task rejected: worker pool is closed")]
    Rejected,
}

impl TaskError {
    /// Creates a failure from any displayable error.
    #[must_use]
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }

    /// Builds a panic error from a `catch_unwind` payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::Failed(reason) => {
                map.insert("type".to_string(), serde_json::json!("TaskFailed"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::Panicked(reason) => {
                map.insert("type".to_string(), serde_json::json!("TaskPanicked"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::Abandoned => {
                map.insert("type".to_string(), serde_json::json!("TaskAbandoned"));
            }
            Self::Rejected => {
                map.insert("type".to_string(), serde_json::json!("TaskRejected"));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An expiry token was not recognised.
    #[error("Unsupported expire value: '{0}'")]
    InvalidExpiry(String),

    /// A container or pool was given a zero capacity.
    #[error("Capacity must be greater than zero")]
    InvalidCapacity,

    /// Two producers share the same id.
    #[error("Duplicate producer id: {0}")]
    DuplicateProducer(String),

    /// An environment variable could not be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    Env {
        /// The variable name.
        key: String,
        /// The raw value.
        value: String,
    },
}

/// Errors raised by a cache backend.
///
/// The memoizer logs these and treats them as misses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("Cache store error: {0}")]
    Store(String),

    /// A value could not be (de)serialized.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
