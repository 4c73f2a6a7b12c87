//! Orphan buffer: blocks whose parent has not been persisted yet.
//!
//! Entries are keyed by the missing parent hash. After every persist the
//! ledger drains the dependents of the block it just committed and submits
//! them again, so a run of out-of-order blocks collapses in one pass.

use std::collections::HashMap;

use keel_types::{Block, Hash256};

#[derive(Clone, Debug)]
pub struct OrphanEntry {
    pub block: Block,
    /// Unix seconds at which the block was buffered.
    pub received_at: u64,
}

pub struct OrphanPool {
    entries: HashMap<Hash256, Vec<OrphanEntry>>,
    count: usize,
    max_size: usize,
}

impl OrphanPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            count: 0,
            max_size,
        }
    }

    /// Buffer `block` until `block.prev_hash` is persisted.
    ///
    /// Returns `false` if the pool is full or the block is already buffered.
    pub fn insert(&mut self, block: Block, now: u64) -> bool {
        if self.count >= self.max_size {
            return false;
        }
        let hash = block.hash();
        let waiting = self.entries.entry(block.header.prev_hash).or_default();
        if waiting.iter().any(|e| e.block.hash() == hash) {
            return false;
        }
        waiting.push(OrphanEntry {
            block,
            received_at: now,
        });
        self.count += 1;
        true
    }

    /// Remove and return every block waiting for `parent`.
    pub fn take_dependents(&mut self, parent: &Hash256) -> Vec<Block> {
        match self.entries.remove(parent) {
            Some(entries) => {
                self.count -= entries.len();
                entries.into_iter().map(|e| e.block).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|e| e.block.hash() == *hash)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drop entries older than `max_age_secs`. Returns how many were removed.
    pub fn clear_expired(&mut self, max_age_secs: u64, now: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, waiting| {
            let before = waiting.len();
            waiting.retain(|e| now.saturating_sub(e.received_at) < max_age_secs);
            removed += before - waiting.len();
            !waiting.is_empty()
        });
        self.count -= removed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Header, ScriptHash, Timestamp, Witness};

    fn block(prev: Hash256, index: u32) -> Block {
        Block {
            header: Header {
                version: 0,
                prev_hash: prev,
                merkle_root: Hash256::ZERO,
                timestamp: Timestamp::new(index as u64),
                index,
                consensus_data: 0,
                next_consensus: ScriptHash::ZERO,
                witness: Witness::default(),
            },
            transactions: Vec::new(),
        }
    }

    #[test]
    fn dependents_are_drained_once() {
        let mut pool = OrphanPool::new(10);
        let parent = Hash256::digest(b"parent");
        assert!(pool.insert(block(parent, 5), 100));
        assert!(pool.insert(block(parent, 6), 100));
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.take_dependents(&parent).len(), 2);
        assert!(pool.take_dependents(&parent).is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_is_not_buffered_twice() {
        let mut pool = OrphanPool::new(10);
        let b = block(Hash256::digest(b"p"), 3);
        assert!(pool.insert(b.clone(), 1));
        assert!(!pool.insert(b.clone(), 2));
        assert!(pool.contains(&b.hash()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn full_pool_rejects() {
        let mut pool = OrphanPool::new(1);
        assert!(pool.insert(block(Hash256::digest(b"a"), 1), 0));
        assert!(!pool.insert(block(Hash256::digest(b"b"), 1), 0));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let mut pool = OrphanPool::new(10);
        pool.insert(block(Hash256::digest(b"old"), 1), 100);
        pool.insert(block(Hash256::digest(b"new"), 1), 500);
        assert_eq!(pool.clear_expired(300, 600), 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.take_dependents(&Hash256::digest(b"old")).is_empty());
    }
}
