//! Bounded map that materializes missing values from a factory.

use std::collections::HashMap;
use std::hash::Hash;

use super::lock::ContainerLock;
use super::order::InsertionOrder;
use crate::errors::ConfigError;

type Factory<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

struct Inner<K, V> {
    order: InsertionOrder<K>,
    values: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn insert(&mut self, key: K, value: V, capacity: usize) -> Option<(K, V)> {
        let mut evicted = None;
        if self.values.contains_key(&key) {
            self.order.remove(&key);
        } else if self.values.len() >= capacity {
            if let Some(oldest) = self.order.pop_oldest() {
                evicted = self.values.remove(&oldest).map(|v| (oldest, v));
            }
        }
        self.order.push_newest(key.clone());
        self.values.insert(key, value);
        evicted
    }
}

/// A fixed-capacity map with FIFO eviction and a default-value factory.
///
/// Reading a missing key through [`get`](Self::get) inserts the factory's
/// value, so reads can evict. The factory and [`update`](Self::update)
/// closures run under the container's lock and may use the map themselves.
pub struct DefaultFifoMap<K, V> {
    capacity: usize,
    factory: Factory<K, V>,
    inner: ContainerLock<Inner<K, V>>,
}

impl<K, V> DefaultFifoMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a map holding at most `capacity` entries.
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self, ConfigError>
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            factory: Box::new(factory),
            inner: ContainerLock::new(Inner {
                order: InsertionOrder::with_capacity(capacity),
                values: HashMap::with_capacity(capacity),
            }),
        })
    }

    /// Returns the value for `key`, creating it with the factory on a miss.
    pub fn get(&self, key: &K) -> V {
        let _held = self.inner.hold();
        if let Some(value) = self.inner.with(|inner| inner.values.get(key).cloned()) {
            return value;
        }
        let value = (self.factory)(key);
        self.inner
            .with(|inner| inner.insert(key.clone(), value.clone(), self.capacity));
        value
    }

    /// Returns the value for `key` without materializing a default.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.with(|inner| inner.values.get(key).cloned())
    }

    /// Stores `value` as the newest entry; returns the evicted entry, if any.
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.with(|inner| inner.insert(key, value, self.capacity))
    }

    /// Applies `f` to the value for `key` (materializing it first if needed).
    ///
    /// An existing key keeps its position; a new one becomes the newest entry.
    pub fn update<F>(&self, key: &K, f: F) -> V
    where
        F: FnOnce(&mut V),
    {
        let _held = self.inner.hold();
        let current = self.inner.with(|inner| inner.values.get(key).cloned());
        let mut value = match current {
            Some(value) => value,
            None => (self.factory)(key),
        };
        f(&mut value);

        self.inner.with(|inner| match inner.values.get_mut(key) {
            Some(slot) => *slot = value.clone(),
            None => {
                inner.insert(key.clone(), value.clone(), self.capacity);
            }
        });
        value
    }

    /// Removes `key`; returns its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.with(|inner| {
            let value = inner.values.remove(key)?;
            inner.order.remove(key);
            Some(value)
        })
    }

    /// Removes every listed key that is present; returns how many were removed.
    pub fn remove_any<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        self.inner.with(|inner| {
            let mut removed = 0;
            for key in keys {
                if inner.values.remove(key).is_some() {
                    inner.order.remove(key);
                    removed += 1;
                }
            }
            removed
        })
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.with(|inner| inner.values.contains_key(key))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.with(|inner| inner.values.len())
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.with(|inner| inner.values.is_empty())
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entries, oldest first.
    pub fn items(&self) -> Vec<(K, V)> {
        self.inner.with(|inner| {
            inner
                .order
                .iter()
                .filter_map(|k| inner.values.get(k).map(|v| (k.clone(), v.clone())))
                .collect()
        })
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.with(|inner| {
            inner.order.clear();
            inner.values.clear();
        });
    }
}

impl<K, V> std::fmt::Debug for DefaultFifoMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultFifoMap")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.with(|inner| inner.values.len()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_materializes_default() {
        let map = DefaultFifoMap::new(4, |_: &String| Vec::<u32>::new()).unwrap();

        assert!(!map.contains(&"k".to_string()));
        assert_eq!(map.get(&"k".to_string()), Vec::<u32>::new());
        assert!(map.contains(&"k".to_string()));
        assert_eq!(map.peek(&"missing".to_string()), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_factory_sees_key() {
        let map = DefaultFifoMap::new(4, |k: &u32| k * 10).unwrap();
        assert_eq!(map.get(&7), 70);
    }

    #[test]
    fn test_reads_can_evict() {
        let map = DefaultFifoMap::new(2, |_: &&str| 0).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        assert_eq!(map.get(&"c"), 0);

        assert!(!map.contains(&"a"));
        assert_eq!(map.items(), vec![("b", 2), ("c", 0)]);
    }

    #[test]
    fn test_set_overwrites_and_moves_to_newest() {
        let map = DefaultFifoMap::new(2, |_: &&str| 0).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        assert_eq!(map.set("a", 3), None);
        assert_eq!(map.set("c", 4), Some(("b", 2)));
        assert_eq!(map.items(), vec![("a", 3), ("c", 4)]);
    }

    #[test]
    fn test_update_and_remove() {
        let map = DefaultFifoMap::new(3, |_: &&str| 0_u32).unwrap();
        map.update(&"hits", |v| *v += 1);
        assert_eq!(map.update(&"hits", |v| *v += 1), 2);

        assert_eq!(map.remove(&"hits"), Some(2));
        assert_eq!(map.remove(&"hits"), None);
        map.set("x", 1);
        map.set("y", 1);
        assert_eq!(map.remove_any(&["x", "y", "z"]), 2);
        assert!(map.is_empty());
    }

    #[test]
    fn test_update_closure_may_use_the_map() {
        let map = DefaultFifoMap::new(4, |_: &u32| 0_usize).unwrap();
        map.set(1, 0);
        map.set(2, 0);

        let updated = map.update(&1, |v| *v = map.len());
        assert_eq!(updated, 2);

        map.update(&3, |v| *v = map.get(&4) + 10);
        assert_eq!(map.items(), vec![(1, 2), (2, 0), (4, 0), (3, 10)]);
    }

    #[test]
    fn test_update_keeps_position_of_existing_key() {
        let map = DefaultFifoMap::new(3, |_: &&str| 0).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        map.update(&"a", |v| *v += 1);

        assert_eq!(map.items(), vec![("a", 2), ("b", 2)]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let map = std::sync::Arc::new(DefaultFifoMap::new(4, |_: &&str| 0_u32).unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        map.update(&"hits", |v| *v += 1);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(map.peek(&"hits"), Some(2_000));
    }
}
