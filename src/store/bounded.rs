//! Insertion-ordered set with a hard capacity.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// A set that remembers insertion order and evicts the oldest entries once
/// it grows past `capacity`.
#[derive(Debug, Clone)]
pub struct BoundedSet<T> {
    order: VecDeque<T>,
    members: HashSet<T>,
    capacity: usize,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    /// Create an empty set. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            members: HashSet::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }

    /// Insert a value. Returns `false` if it was already present, in which
    /// case its position is unchanged.
    pub fn insert(&mut self, value: T) -> bool {
        if !self.members.insert(value.clone()) {
            return false;
        }
        self.order.push_back(value);
        self.evict_overflow();
        true
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter()
    }
}

impl<T: Eq + Hash + Clone> Extend<T> for BoundedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}
