//! Bounded multiset that counts repeated additions.

use std::collections::HashMap;
use std::hash::Hash;

use super::lock::ContainerLock;
use super::order::InsertionOrder;
use crate::errors::ConfigError;

struct Inner<T> {
    order: InsertionOrder<T>,
    counts: HashMap<T, usize>,
}

/// A fixed-capacity set that tracks how often each member was added.
///
/// Adding an existing member increments its count and moves it to the
/// newest position; adding a new member to a full set evicts the oldest
/// member together with its count.
pub struct CountedFifoSet<T> {
    capacity: usize,
    inner: ContainerLock<Inner<T>>,
}

impl<T> CountedFifoSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Creates a set holding at most `capacity` distinct members.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            inner: ContainerLock::new(Inner {
                order: InsertionOrder::with_capacity(capacity),
                counts: HashMap::with_capacity(capacity),
            }),
        })
    }

    /// Adds `item` and returns its updated count.
    pub fn add(&self, item: T) -> usize {
        self.inner.with(|inner| {
            if let Some(count) = inner.counts.get_mut(&item) {
                *count += 1;
                let count = *count;
                inner.order.remove(&item);
                inner.order.push_newest(item);
                return count;
            }

            if inner.counts.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_oldest() {
                    inner.counts.remove(&oldest);
                }
            }
            inner.order.push_newest(item.clone());
            inner.counts.insert(item, 1);
            1
        })
    }

    /// Returns how many times `item` was added, or 0 if it is not a member.
    pub fn count(&self, item: &T) -> usize {
        self.inner.with(|inner| inner.counts.get(item).copied().unwrap_or(0))
    }

    /// Removes `item` and returns its count.
    pub fn remove(&self, item: &T) -> Option<usize> {
        self.inner.with(|inner| {
            let count = inner.counts.remove(item)?;
            inner.order.remove(item);
            Some(count)
        })
    }

    /// Removes every listed item that is present; returns how many were removed.
    pub fn remove_any<'a, I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        self.inner.with(|inner| {
            let mut removed = 0;
            for item in items {
                if inner.counts.remove(item).is_some() {
                    inner.order.remove(item);
                    removed += 1;
                }
            }
            removed
        })
    }

    /// Returns true if `item` is a member.
    pub fn contains(&self, item: &T) -> bool {
        self.inner.with(|inner| inner.counts.contains_key(item))
    }

    /// Returns the number of distinct members.
    pub fn len(&self) -> usize {
        self.inner.with(|inner| inner.counts.len())
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.with(|inner| inner.counts.is_empty())
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns members with their counts, oldest first.
    pub fn items(&self) -> Vec<(T, usize)> {
        self.inner.with(|inner| {
            inner
                .order
                .iter()
                .filter_map(|item| inner.counts.get(item).map(|c| (item.clone(), *c)))
                .collect()
        })
    }

    /// Returns members ordered by descending count; ties keep insertion order.
    pub fn most_common(&self) -> Vec<(T, usize)> {
        let mut items = self.items();
        items.sort_by(|a, b| b.1.cmp(&a.1));
        items
    }

    /// Removes every member.
    pub fn clear(&self) {
        self.inner.with(|inner| {
            inner.order.clear();
            inner.counts.clear();
        });
    }
}

impl<T> std::fmt::Debug for CountedFifoSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountedFifoSet")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.with(|inner| inner.counts.len()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counts_repeated_adds() {
        let set = CountedFifoSet::new(4).unwrap();
        assert_eq!(set.add("x"), 1);
        assert_eq!(set.add("x"), 2);
        assert_eq!(set.add("y"), 1);

        assert_eq!(set.count(&"x"), 2);
        assert_eq!(set.count(&"missing"), 0);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_readd_promotes_member() {
        let set = CountedFifoSet::new(2).unwrap();
        set.add("a");
        set.add("b");
        set.add("a");
        set.add("c");

        assert!(!set.contains(&"b"));
        assert_eq!(set.items(), vec![("a", 2), ("c", 1)]);
    }

    #[test]
    fn test_eviction_forgets_count() {
        let set = CountedFifoSet::new(1).unwrap();
        set.add(1);
        set.add(1);
        set.add(2);
        assert_eq!(set.add(1), 1);
    }

    #[test]
    fn test_most_common_and_removal() {
        let set = CountedFifoSet::new(5).unwrap();
        for item in ["a", "b", "b", "c", "c", "c"] {
            set.add(item);
        }
        assert_eq!(set.most_common(), vec![("c", 3), ("b", 2), ("a", 1)]);

        assert_eq!(set.remove(&"c"), Some(3));
        assert_eq!(set.remove_any(&["a", "z"]), 1);
        assert_eq!(set.items(), vec![("b", 2)]);
        set.clear();
        assert!(set.is_empty());
    }
}
