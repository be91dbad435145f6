//! Bounded set that remembers insertion order.

use std::collections::HashSet;
use std::hash::Hash;

use super::lock::ContainerLock;
use super::order::InsertionOrder;
use crate::errors::ConfigError;

struct Inner<T> {
    order: InsertionOrder<T>,
    members: HashSet<T>,
}

/// A fixed-capacity set that evicts its oldest member when full.
///
/// Re-adding a member moves it to the newest position. Every operation
/// holds the container's lock for its full duration.
pub struct UniqueFifoSet<T> {
    capacity: usize,
    inner: ContainerLock<Inner<T>>,
}

impl<T> UniqueFifoSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Creates a set holding at most `capacity` members.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            inner: ContainerLock::new(Inner {
                order: InsertionOrder::with_capacity(capacity),
                members: HashSet::with_capacity(capacity),
            }),
        })
    }

    /// Adds `item` as the newest member.
    ///
    /// Returns the member evicted to make room, if any.
    pub fn add(&self, item: T) -> Option<T> {
        self.inner.with(|inner| {
            let mut evicted = None;

            if inner.members.contains(&item) {
                inner.order.remove(&item);
            } else if inner.members.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_oldest() {
                    inner.members.remove(&oldest);
                    evicted = Some(oldest);
                }
            }

            inner.order.push_newest(item.clone());
            inner.members.insert(item);
            evicted
        })
    }

    /// Removes `item`; returns whether it was present.
    pub fn remove(&self, item: &T) -> bool {
        self.inner.with(|inner| {
            if inner.members.remove(item) {
                inner.order.remove(item);
                true
            } else {
                false
            }
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
                if inner.members.remove(item) {
                    inner.order.remove(item);
                    removed += 1;
                }
            }
            removed
        })
    }

    /// Returns true if `item` is a member.
    pub fn contains(&self, item: &T) -> bool {
        self.inner.with(|inner| inner.members.contains(item))
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.inner.with(|inner| inner.members.len())
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.with(|inner| inner.members.is_empty())
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the members, oldest first.
    pub fn items(&self) -> Vec<T> {
        self.inner.with(|inner| inner.order.iter().cloned().collect())
    }

    /// Removes every member.
    pub fn clear(&self) {
        self.inner.with(|inner| {
            inner.order.clear();
            inner.members.clear();
        });
    }
}

impl<T> std::fmt::Debug for UniqueFifoSet<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.with(|inner| {
            f.debug_struct("UniqueFifoSet")
                .field("capacity", &self.capacity)
                .field("items", &inner.order.iter().collect::<Vec<_>>())
                .finish()
        })
    }
}
