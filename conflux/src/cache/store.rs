//! Cache storage backends.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::ToolkitConfig;
use crate::containers::ExpiringFifoMap;
use crate::errors::{CacheError, ConfigError};

/// Default number of entries held by [`InMemoryCacheStore`].
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// A key/value backend for memoized results.
///
/// Implementations must be safe for concurrent use. Expiry is enforced by
/// the store; a read past an entry's TTL must behave as a miss.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Deletes `key`; returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Process-local store backed by an [`ExpiringFifoMap`].
///
/// Bounded, with lazy expiry: nothing sweeps the map in the background.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: ExpiringFifoMap<String, Value>,
}

impl InMemoryCacheStore {
    /// Creates a store holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            entries: ExpiringFifoMap::new(capacity)?,
        })
    }

    /// Creates a store sized from configuration.
    pub fn from_config(config: &ToolkitConfig) -> Result<Self, ConfigError> {
        Self::new(config.cache_capacity)
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.entries.get(&key.to_string()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.set(key.to_string(), value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(&key.to_string()).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
