//! Bounded map whose entries expire after a time-to-live.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use super::lock::ContainerLock;
use super::order::InsertionOrder;
use crate::errors::ConfigError;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Inner<K, V> {
    order: InsertionOrder<K>,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn purge(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
            self.order.remove(key);
        }
        expired.len()
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(key);
        Some(entry)
    }
}

/// A fixed-capacity map with FIFO eviction and per-entry expiry.
///
/// Expired entries are dropped lazily: on lookup, and in bulk whenever a
/// new entry is stored. Entries stored without a TTL (and with no default
/// TTL configured) never expire.
pub struct ExpiringFifoMap<K, V> {
    capacity: usize,
    default_ttl: Option<Duration>,
    inner: ContainerLock<Inner<K, V>>,
}

impl<K, V> ExpiringFifoMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a map holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            default_ttl: None,
            inner: ContainerLock::new(Inner {
                order: InsertionOrder::with_capacity(capacity),
                entries: HashMap::with_capacity(capacity),
            }),
        })
    }

    /// Sets the TTL applied when [`set`](Self::set) is given none.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Stores `value` as the newest entry.
    ///
    /// Expired entries are purged first; if the map is still full the
    /// oldest entry is evicted. A TTL too large to represent as a deadline
    /// means the entry never expires.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.or(self.default_ttl).and_then(|ttl| now.checked_add(ttl));
        self.inner.with(|inner| {
            inner.purge(now);
            if inner.remove(&key).is_none() && inner.entries.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_oldest() {
                    inner.entries.remove(&oldest);
                }
            }
            inner.order.push_newest(key.clone());
            inner.entries.insert(key, Entry { value, expires_at });
        });
    }

    /// Returns the live value for `key`, deleting it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.inner.with(|inner| {
            if inner.entries.get(key)?.is_expired(now) {
                inner.remove(key);
                return None;
            }
            inner.entries.get(key).map(|entry| entry.value.clone())
        })
    }

    /// Returns the time left before `key` expires.
    ///
    /// `None` if the key is absent or expired; `Some(None)` if it never expires.
    pub fn ttl(&self, key: &K) -> Option<Option<Duration>> {
        let now = Instant::now();
        self.inner.with(|inner| {
            let entry = inner.entries.get(key).filter(|e| !e.is_expired(now))?;
            Some(entry.expires_at.map(|at| at.saturating_duration_since(now)))
        })
    }

    /// Returns true if `key` holds a live value.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`; returns its value if it was live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entry = self.inner.with(|inner| inner.remove(key))?;
        (!entry.is_expired(now)).then_some(entry.value)
    }

    /// Removes every listed key that is present; returns how many were removed.
    pub fn remove_any<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        self.inner.with(|inner| {
            keys.into_iter()
                .filter(|key| inner.remove(key).is_some())
                .count()
        })
    }

    /// Drops every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.inner.with(|inner| inner.purge(now))
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.with(|inner| {
            inner.purge(now);
            inner.entries.len()
        })
    }

    /// Returns true if no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the live entries, oldest first.
    pub fn items(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        self.inner.with(|inner| {
            inner
                .order
                .iter()
                .filter_map(|key| {
                    inner
                        .entries
                        .get(key)
                        .filter(|entry| !entry.is_expired(now))
                        .map(|entry| (key.clone(), entry.value.clone()))
                })
                .collect()
        })
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.with(|inner| {
            inner.order.clear();
            inner.entries.clear();
        });
    }
}

impl<K, V> std::fmt::Debug for ExpiringFifoMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringFifoMap")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .field("len", &self.inner.with(|inner| inner.entries.len()))
            .finish_non_exhaustive()
    }
}
