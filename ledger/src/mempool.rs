//! Bounded pool of unconfirmed transactions.
//!
//! Entries are ranked by network fee per byte, highest first. Among equal
//! fee rates the earlier arrival wins: every admission takes the next value
//! of a monotonically increasing sequence counter, and that counter is the
//! tie-break. The pool is split into a *verified* partition (checked against
//! the current chain tip, eligible for block proposals) and an *unverified*
//! partition (waiting to be re-checked after a block was persisted).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use keel_types::{Block, CoinReference, Fixed8, Hash256, Timestamp, Transaction};

use crate::VerifyResult;

/// Rank of a pool entry. Greater means higher priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Priority {
    /// Network fee in raw units per serialized byte.
    pub fee_rate: i64,
    /// Admission order; lower arrived first.
    pub sequence: u64,
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher fee rate = higher priority.
        // On tie, lower sequence (earlier arrival) = higher priority.
        self.fee_rate
            .cmp(&other.fee_rate)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Network fee per byte of `tx`.
pub fn fee_rate(tx: &Transaction, network_fee: Fixed8) -> i64 {
    let size = tx.size().max(1) as i64;
    network_fee.raw() / size
}

#[derive(Clone, Debug)]
pub struct PoolItem {
    pub transaction: Transaction,
    pub network_fee: Fixed8,
    pub priority: Priority,
    pub received_at: Timestamp,
    verified: bool,
}

pub struct MemoryPool {
    capacity: usize,
    next_sequence: u64,
    items: HashMap<Hash256, PoolItem>,
    verified: BTreeMap<Priority, Hash256>,
    unverified: BTreeMap<Priority, Hash256>,
    /// Which pooled transaction claims each input.
    inputs: HashMap<CoinReference, Hash256>,
    min_fee_rate: i64,
    /// Entries below `min_fee_rate`.
    low_fee: usize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_sequence: 0,
            items: HashMap::new(),
            verified: BTreeMap::new(),
            unverified: BTreeMap::new(),
            inputs: HashMap::new(),
            min_fee_rate: 0,
            low_fee: 0,
        }
    }

    /// Count entries paying less than `rate` per byte as low priority.
    pub fn with_min_fee_rate(mut self, rate: i64) -> Self {
        self.min_fee_rate = rate;
        self.low_fee = self.items.values().filter(|item| item.priority.fee_rate < rate).count();
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len_verified(&self) -> usize {
        self.verified.len()
    }

    pub fn len_unverified(&self) -> usize {
        self.unverified.len()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.items.contains_key(hash)
    }

    pub fn try_get(&self, hash: &Hash256) -> Option<&Transaction> {
        self.items.get(hash).map(|item| &item.transaction)
    }

    /// Whether `input` is claimed by a pooled transaction other than `except`.
    pub fn is_conflicting(&self, input: &CoinReference, except: Option<&Hash256>) -> bool {
        match self.inputs.get(input) {
            Some(owner) => Some(owner) != except,
            None => false,
        }
    }

    /// Entries paying less than the pool's minimum fee rate.
    pub fn low_priority_count(&self) -> usize {
        self.low_fee
    }

    fn lowest(&self) -> Option<(Priority, Hash256)> {
        let verified = self.verified.first_key_value().map(|(p, h)| (*p, *h));
        let unverified = self.unverified.first_key_value().map(|(p, h)| (*p, *h));
        match (verified, unverified) {
            (Some(v), Some(u)) => Some(if u.0 <= v.0 { u } else { v }),
            (v, u) => v.or(u),
        }
    }

    /// Admit a verified transaction.
    ///
    /// When the pool is full the new entry must outrank the current lowest
    /// entry, which is then evicted; otherwise `OutOfMemory`.
    pub fn try_add(&mut self, tx: Transaction, network_fee: Fixed8, now: Timestamp) -> VerifyResult {
        let hash = tx.hash();
        if self.items.contains_key(&hash) {
            return VerifyResult::AlreadyExists;
        }
        if self.capacity == 0 {
            return VerifyResult::OutOfMemory;
        }
        let priority = Priority {
            fee_rate: fee_rate(&tx, network_fee),
            sequence: self.next_sequence,
        };
        if self.items.len() >= self.capacity {
            match self.lowest() {
                Some((lowest, evicted)) if priority > lowest => {
                    self.remove(&evicted);
                    tracing::debug!(%evicted, "evicted lowest-priority pool entry");
                }
                _ => return VerifyResult::OutOfMemory,
            }
        }
        self.next_sequence += 1;
        if priority.fee_rate < self.min_fee_rate {
            self.low_fee += 1;
        }

        for input in &tx.inputs {
            self.inputs.insert(*input, hash);
        }
        self.verified.insert(priority, hash);
        self.items.insert(
            hash,
            PoolItem {
                transaction: tx,
                network_fee,
                priority,
                received_at: now,
                verified: true,
            },
        );
        VerifyResult::Succeed
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<Transaction> {
        let item = self.items.remove(hash)?;
        if item.priority.fee_rate < self.min_fee_rate {
            self.low_fee -= 1;
        }
        if item.verified {
            self.verified.remove(&item.priority);
        } else {
            self.unverified.remove(&item.priority);
        }
        for input in &item.transaction.inputs {
            if self.inputs.get(input) == Some(hash) {
                self.inputs.remove(input);
            }
        }
        Some(item.transaction)
    }

    /// Verified transactions, highest priority first.
    pub fn verified_transactions(&self) -> Vec<Transaction> {
        self.verified
            .values()
            .rev()
            .filter_map(|hash| self.items.get(hash))
            .map(|item| item.transaction.clone())
            .collect()
    }

    pub fn verified_hashes(&self) -> Vec<Hash256> {
        self.verified.values().rev().copied().collect()
    }

    /// Reconcile with a newly persisted block.
    ///
    /// Included transactions leave the pool. Transactions spending an input
    /// the block spent are dropped. Every other verified entry moves to the
    /// unverified partition, to be re-checked against the new tip.
    pub fn on_persist_completed(&mut self, block: &Block) {
        for hash in block.transaction_hashes() {
            self.remove(&hash);
        }

        let spent: HashSet<&CoinReference> =
            block.transactions.iter().flat_map(|tx| tx.inputs.iter()).collect();
        let conflicting: Vec<Hash256> = spent
            .iter()
            .filter_map(|input| self.inputs.get(*input).copied())
            .collect();
        for hash in conflicting {
            self.remove(&hash);
        }

        let demoted = std::mem::take(&mut self.verified);
        for (priority, hash) in demoted {
            if let Some(item) = self.items.get_mut(&hash) {
                item.verified = false;
            }
            self.unverified.insert(priority, hash);
        }
    }

    /// Up to `max` unverified hashes, highest priority first.
    pub fn unverified_to_reverify(&self, max: usize) -> Vec<Hash256> {
        self.unverified.values().rev().take(max).copied().collect()
    }

    /// Re-check up to `max` unverified entries, highest priority first.
    /// `check` sees the pool as it stands, with the entry still present.
    /// Entries that pass return to the verified partition; the rest are
    /// dropped. Returns `(reverified, dropped)`.
    pub fn reverify<F>(&mut self, max: usize, mut check: F) -> (usize, usize)
    where
        F: FnMut(&Transaction, &MemoryPool) -> bool,
    {
        let (mut kept, mut dropped) = (0, 0);
        for hash in self.unverified_to_reverify(max) {
            let (passed, priority) = match self.items.get(&hash) {
                Some(item) => (check(&item.transaction, self), item.priority),
                None => continue,
            };
            if passed {
                self.unverified.remove(&priority);
                self.verified.insert(priority, hash);
                if let Some(item) = self.items.get_mut(&hash) {
                    item.verified = true;
                }
                kept += 1;
            } else {
                self.remove(&hash);
                dropped += 1;
            }
        }
        (kept, dropped)
    }
}
