//! Relay cache and relay outcomes.
//!
//! The cache keeps the most recently relayed inventories so that `getdata`
//! for a fresh transaction or a consensus payload, which the ledger cannot
//! serve, is answered without a round trip to its owner.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use keel_ledger::VerifyResult;
use keel_protocol::Message;
use keel_types::{Block, ConsensusPayload, Hash256, InventoryType, Transaction};

pub const RELAY_CACHE_CAPACITY: usize = 100;

/// What the wire layer did with an inventory.
///
/// Kept apart from [`VerifyResult`], which only describes the ledger's
/// verdict: a duplicate announcement is not a ledger rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayResult {
    /// Announced to at least one session.
    Accepted,
    /// Already relayed recently or already known.
    Duplicate,
    Rejected(VerifyResult),
    /// Nobody to announce it to.
    NotRelayed,
}

impl RelayResult {
    pub fn from_verify(result: VerifyResult) -> Self {
        match result {
            VerifyResult::Succeed => RelayResult::Accepted,
            VerifyResult::AlreadyExists => RelayResult::Duplicate,
            other => RelayResult::Rejected(other),
        }
    }
}

impl fmt::Display for RelayResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayResult::Accepted => f.write_str("accepted"),
            RelayResult::Duplicate => f.write_str("duplicate"),
            RelayResult::Rejected(reason) => write!(f, "rejected ({reason})"),
            RelayResult::NotRelayed => f.write_str("not_relayed"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Inventory {
    Block(Arc<Block>),
    Transaction(Arc<Transaction>),
    Consensus(Arc<ConsensusPayload>),
}

impl Inventory {
    pub fn hash(&self) -> Hash256 {
        match self {
            Inventory::Block(b) => b.hash(),
            Inventory::Transaction(t) => t.hash(),
            Inventory::Consensus(c) => c.hash(),
        }
    }

    pub fn kind(&self) -> InventoryType {
        match self {
            Inventory::Block(_) => InventoryType::Block,
            Inventory::Transaction(_) => InventoryType::Tx,
            Inventory::Consensus(_) => InventoryType::Consensus,
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Inventory::Block(b) => Message::Block(Block::clone(b)),
            Inventory::Transaction(t) => Message::Tx(Transaction::clone(t)),
            Inventory::Consensus(c) => Message::Consensus(ConsensusPayload::clone(c)),
        }
    }
}

pub struct RelayCache {
    capacity: usize,
    items: HashMap<Hash256, Inventory>,
    order: VecDeque<Hash256>,
}

impl RelayCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns `false` if the inventory was already cached.
    pub fn insert(&mut self, inventory: Inventory) -> bool {
        let hash = inventory.hash();
        if self.items.contains_key(&hash) {
            return false;
        }
        if self.items.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.items.remove(&old);
            }
        }
        self.items.insert(hash, inventory);
        self.order.push_back(hash);
        true
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Inventory> {
        self.items.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.items.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for RelayCache {
    fn default() -> Self {
        Self::new(RELAY_CACHE_CAPACITY)
    }
}
