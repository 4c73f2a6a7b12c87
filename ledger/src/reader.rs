//! Read-only queries against the latest committed state.
//!
//! A [`LedgerReader`] is cheap to clone and never goes through the ledger
//! mailbox. Store reads see only committed batches; the chain pointers are
//! published by the ledger after each commit, so a reader may briefly lag
//! the writer but never observes a partial block.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_store::{Snapshot, Store, StoreError};
use keel_types::{
    Block, Fixed8, Hash256, Header, PublicKey, ScriptHash, Transaction, TransactionOutput,
};

use crate::validators::next_validators;

/// Chain pointers shared between the ledger and its readers.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    pub height: u32,
    pub current_block_hash: Hash256,
    /// Hash of every known header, by height.
    pub header_index: Vec<Hash256>,
}

impl ChainState {
    pub fn header_height(&self) -> u32 {
        self.header_index.len().saturating_sub(1) as u32
    }
}

#[derive(Clone)]
pub struct SharedChain(Arc<RwLock<ChainState>>);

impl SharedChain {
    pub fn new(state: ChainState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ChainState> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct LedgerReader {
    store: Arc<dyn Store>,
    chain: SharedChain,
    standby: Arc<[PublicKey]>,
    max_validators: usize,
}

impl LedgerReader {
    pub fn new(
        store: Arc<dyn Store>,
        chain: SharedChain,
        standby: Arc<[PublicKey]>,
        max_validators: usize,
    ) -> Self {
        Self {
            store,
            chain,
            standby,
            max_validators,
        }
    }

    /// A snapshot of the state committed at the time of the call. Every
    /// read through it sees that one state, even while the ledger persists.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Snapshot::new(Arc::clone(&self.store))
    }

    pub fn current_height(&self) -> u32 {
        self.chain.read().height
    }

    pub fn header_height(&self) -> u32 {
        self.chain.read().header_height()
    }

    pub fn current_block_hash(&self) -> Hash256 {
        self.chain.read().current_block_hash
    }

    pub fn current_header_hash(&self) -> Hash256 {
        self.chain.read().header_index.last().copied().unwrap_or_default()
    }

    pub fn block_hash(&self, index: u32) -> Option<Hash256> {
        self.chain.read().header_index.get(index as usize).copied()
    }

    pub fn header(&self, hash: &Hash256) -> Result<Option<Header>, StoreError> {
        self.snapshot()?.get_header(hash)
    }

    pub fn header_by_index(&self, index: u32) -> Result<Option<Header>, StoreError> {
        match self.block_hash(index) {
            Some(hash) => self.header(&hash),
            None => Ok(None),
        }
    }

    pub fn block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        self.snapshot()?.get_block(hash)
    }

    pub fn block_by_index(&self, index: u32) -> Result<Option<Block>, StoreError> {
        match self.block_hash(index) {
            Some(hash) => self.block(&hash),
            None => Ok(None),
        }
    }

    /// A stored transaction and the height of the block that holds it.
    pub fn transaction(&self, hash: &Hash256) -> Result<Option<(Transaction, u32)>, StoreError> {
        Ok(self
            .snapshot()?
            .transactions
            .try_get(hash)?
            .map(|s| (s.transaction, s.block_index)))
    }

    pub fn contains_block(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.snapshot()?.contains_block(hash)
    }

    pub fn contains_transaction(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.snapshot()?.contains_transaction(hash)
    }

    pub fn balance(&self, account: &ScriptHash, asset: &Hash256) -> Result<Fixed8, StoreError> {
        Ok(self
            .snapshot()?
            .accounts
            .try_get(account)?
            .map_or(Fixed8::ZERO, |a| a.balance(asset)))
    }

    pub fn unspent(&self, hash: &Hash256, index: u16) -> Result<Option<TransactionOutput>, StoreError> {
        self.snapshot()?.get_unspent(hash, index)
    }

    /// Validators for the next block, assuming no pending enrollments.
    pub fn next_validators(&self) -> Result<Vec<PublicKey>, StoreError> {
        next_validators(&self.snapshot()?, &self.standby, &[], self.max_validators)
    }

    pub fn standby_validators(&self) -> &[PublicKey] {
        &self.standby
    }

    pub fn max_validators(&self) -> usize {
        self.max_validators
    }

    /// Up to `count` hashes following `start` in the header index.
    pub fn hashes_after(&self, start: &Hash256, count: usize) -> Vec<Hash256> {
        let chain = self.chain.read();
        match chain.header_index.iter().position(|h| h == start) {
            Some(pos) => chain.header_index[pos + 1..]
                .iter()
                .take(count)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Up to `count` stored blocks' hashes following `start`, bounded by
    /// the persisted height.
    pub fn block_hashes_after(&self, start: &Hash256, count: usize) -> Vec<Hash256> {
        let chain = self.chain.read();
        let height = chain.height as usize;
        match chain.header_index.iter().position(|h| h == start) {
            Some(pos) if pos < height => chain.header_index[pos + 1..=height]
                .iter()
                .take(count)
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Up to `count` headers following `start`.
    pub fn headers_after(&self, start: &Hash256, count: usize) -> Result<Vec<Header>, StoreError> {
        let snapshot = self.snapshot()?;
        let mut headers = Vec::new();
        for hash in self.hashes_after(start, count) {
            match snapshot.get_header(&hash)? {
                Some(header) => headers.push(header),
                None => break,
            }
        }
        Ok(headers)
    }
}
