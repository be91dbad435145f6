//! Memoization of async functions over a pluggable store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::expiry::Expiry;
use super::key::{derive_key, KeyFunction, KeyStrategy};
use super::metrics::{CacheMetrics, DEFAULT_METRICS_WINDOW};
use super::store::{CacheStore, InMemoryCacheStore, DEFAULT_CACHE_CAPACITY};
use crate::config::ToolkitConfig;
use crate::errors::{CacheError, ConfigError};

type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type KeyPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Returns true for values worth storing: not null, false, zero or empty.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// A stored value that should not be trusted: null or an empty collection.
fn is_unusable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Configures a [`Memoizer`].
pub struct MemoizerBuilder {
    namespace: String,
    store: Option<Arc<dyn CacheStore>>,
    capacity: usize,
    key_strategy: KeyStrategy,
    should_cache: ValuePredicate,
    should_cache_key: Option<KeyPredicate>,
    enabled: bool,
    expire: Option<Expiry>,
    metrics_window: usize,
    error: Option<ConfigError>,
}

impl MemoizerBuilder {
    /// Starts a builder for the function identified by `namespace`.
    ///
    /// The namespace is hashed into every key, so two functions sharing a
    /// store never see each other's entries.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            store: None,
            capacity: DEFAULT_CACHE_CAPACITY,
            key_strategy: KeyStrategy::AllArguments,
            should_cache: Arc::new(is_truthy),
            should_cache_key: None,
            enabled: true,
            expire: None,
            metrics_window: DEFAULT_METRICS_WINDOW,
            error: None,
        }
    }

    /// Starts a builder with store size, metrics window and enablement from `config`.
    #[must_use]
    pub fn from_config(namespace: impl Into<String>, config: &ToolkitConfig) -> Self {
        let mut builder = Self::new(namespace);
        builder.capacity = config.cache_capacity;
        builder.metrics_window = config.metrics_window;
        builder.enabled = config.cache_enabled;
        builder
    }

    /// Uses `store` instead of a fresh in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Derives keys with `key_fn` instead of the raw arguments.
    #[must_use]
    pub fn key_function<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        let key_fn: KeyFunction = Arc::new(key_fn);
        self.key_strategy = KeyStrategy::Custom(key_fn);
        self
    }

    /// Keys only on the named argument fields.
    #[must_use]
    pub fn key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_strategy = KeyStrategy::Fields(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Decides whether a freshly computed result is stored.
    #[must_use]
    pub fn should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Arc::new(predicate);
        self
    }

    /// Vetoes storing results for particular keys.
    #[must_use]
    pub fn should_cache_key<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.should_cache_key = Some(Arc::new(predicate));
        self
    }

    /// Enables or disables caching; a disabled memoizer always calls through.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets when stored entries expire.
    #[must_use]
    pub fn expire(mut self, expire: impl Into<Expiry>) -> Self {
        self.expire = Some(expire.into());
        self
    }

    /// Parses an expiry token such as `"3600"`, `"daily"` or `"Sunday"`.
    ///
    /// An unsupported token makes [`build`](Self::build) fail.
    #[must_use]
    pub fn expire_token(mut self, token: &str) -> Self {
        match token.parse() {
            Ok(expire) => self.expire = Some(expire),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Sets how many latency samples the metrics keep.
    #[must_use]
    pub fn metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }

    /// Builds the memoizer.
    pub fn build(self) -> Result<Memoizer, ConfigError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryCacheStore::new(self.capacity)?),
        };

        Ok(Memoizer {
            inner: Arc::new(MemoizerInner {
                namespace: self.namespace,
                store,
                key_strategy: self.key_strategy,
                should_cache: self.should_cache,
                should_cache_key: self.should_cache_key,
                enabled: self.enabled,
                expire: self.expire,
                metrics: CacheMetrics::new(self.metrics_window),
            }),
        })
    }
}

impl std::fmt::Debug for MemoizerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizerBuilder")
            .field("namespace", &self.namespace)
            .field("key_strategy", &self.key_strategy)
            .field("enabled", &self.enabled)
            .field("expire", &self.expire)
            .finish_non_exhaustive()
    }
}

struct MemoizerInner {
    namespace: String,
    store: Arc<dyn CacheStore>,
    key_strategy: KeyStrategy,
    should_cache: ValuePredicate,
    should_cache_key: Option<KeyPredicate>,
    enabled: bool,
    expire: Option<Expiry>,
    metrics: CacheMetrics,
}

/// Caches the results of an async function keyed by its arguments.
///
/// Store failures never reach the caller: they are logged, counted, and
/// treated as misses. Errors returned by the wrapped function are passed
/// through and never stored. Concurrent misses on the same key may each
/// call the function.
#[derive(Clone)]
pub struct Memoizer {
    inner: Arc<MemoizerInner>,
}

impl Memoizer {
    /// Starts a builder; see [`MemoizerBuilder::new`].
    #[must_use]
    pub fn builder(namespace: impl Into<String>) -> MemoizerBuilder {
        MemoizerBuilder::new(namespace)
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Returns the configured expiry.
    #[must_use]
    pub fn expiry(&self) -> Option<Expiry> {
        self.inner.expire
    }

    /// Returns true if caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    /// Returns the store key for `args`.
    pub fn cache_key<A: Serialize>(&self, args: &A) -> Result<String, CacheError> {
        let args = serde_json::to_value(args)?;
        Ok(derive_key(&self.inner.namespace, &args, &self.inner.key_strategy))
    }

    /// Returns the cached result for `args`, or calls `f(args)` and caches it.
    pub async fn call<A, T, E, F, Fut>(&self, args: A, f: F) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.inner.enabled {
            return f(args).await;
        }

        let key = match self.cache_key(&args) {
            Ok(key) => key,
            Err(err) => {
                warn!(namespace = %self.inner.namespace, error = %err, "Could not derive cache key");
                self.inner.metrics.record_error();
                return f(args).await;
            }
        };

        if let Some(cached) = self.lookup::<T>(&key).await {
            return Ok(cached);
        }

        let result = f(args).await?;
        self.store_result(&key, &result).await;
        Ok(result)
    }

    /// Removes the cached result for `args`; returns whether one was removed.
    pub async fn invalidate<A: Serialize>(&self, args: &A) -> Result<bool, CacheError> {
        let key = self.cache_key(args)?;
        self.inner.store.delete(&key).await
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let metrics = &self.inner.metrics;
        let started = Instant::now();
        let fetched = self.inner.store.get(key).await;
        let latency = started.elapsed();

        let value = match fetched {
            Ok(Some(value)) if !is_unusable(&value) => value,
            Ok(_) => {
                metrics.record_get(latency, false);
                return None;
            }
            Err(err) => {
                warn!(key, error = %err, "Cache get failed, treating as miss");
                metrics.record_error();
                metrics.record_get(latency, false);
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(cached) => {
                debug!(key, "Cache hit");
                metrics.record_get(latency, true);
                Some(cached)
            }
            Err(err) => {
                warn!(key, error = %err, "Cached value has the wrong shape, recomputing");
                metrics.record_error();
                metrics.record_get(latency, false);
                None
            }
        }
    }

    async fn store_result<T: Serialize>(&self, key: &str, result: &T) {
        let metrics = &self.inner.metrics;
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "Could not serialize result for caching");
                metrics.record_error();
                return;
            }
        };

        if !(self.inner.should_cache)(&value) {
            debug!(key, "Result rejected by should_cache");
            return;
        }
        if let Some(veto) = &self.inner.should_cache_key {
            if !veto(key) {
                debug!(key, "Key rejected by should_cache_key");
                return;
            }
        }

        let ttl = self.inner.expire.map(|expire| expire.ttl());
        let started = Instant::now();
        let stored = self.inner.store.set(key, value, ttl).await;
        metrics.record_set(started.elapsed());

        if let Err(err) = stored {
            warn!(key, error = %err, "Cache set failed");
            metrics.record_error();
        }
    }
}

impl std::fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("namespace", &self.inner.namespace)
            .field("key_strategy", &self.inner.key_strategy)
            .field("enabled", &self.inner.enabled)
            .field("expire", &self.inner.expire)
            .finish_non_exhaustive()
    }
}
