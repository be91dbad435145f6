//! Insertion-order bookkeeping shared by the FIFO containers.

use std::collections::VecDeque;

/// Keys from oldest to newest.
#[derive(Debug, Clone)]
pub(crate) struct InsertionOrder<K> {
    keys: VecDeque<K>,
}

impl<K> InsertionOrder<K> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push_newest(&mut self, key: K) {
        self.keys.push_back(key);
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<K> {
        self.keys.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
    }
}

impl<K: PartialEq> InsertionOrder<K> {
    /// Removes `key` wherever it sits. O(n).
    pub(crate) fn remove(&mut self, key: &K) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(index) => {
                self.keys.remove(index);
                true
            }
            None => false,
        }
    }
}
