//! Bounded insertion-ordered hash sets.
//!
//! Sessions use these for the hashes a peer already has and the hashes we
//! announced to it. The oldest entry is evicted once capacity is reached.

use std::collections::{HashSet, VecDeque};

use keel_types::Hash256;

pub const DEFAULT_HASH_CACHE_CAPACITY: usize = 10_000;

pub struct HashCache {
    capacity: usize,
    hashes: HashSet<Hash256>,
    order: VecDeque<Hash256>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            hashes: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `hash`. Returns `false` if it was already present.
    pub fn insert(&mut self, hash: Hash256) -> bool {
        if self.hashes.contains(&hash) {
            return false;
        }
        if self.hashes.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
        self.hashes.insert(hash);
        self.order.push_back(hash);
        true
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Default for HashCache {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_CACHE_CAPACITY)
    }
}
