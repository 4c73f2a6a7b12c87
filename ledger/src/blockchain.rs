//! The ledger state machine.
//!
//! [`Blockchain`] is the single writer of chain state. It owns the header
//! index, the cache of blocks whose headers are known but whose parents are
//! not yet persisted, the orphan buffer and the memory pool. Every block is
//! applied in height order through one persisting [`Snapshot`] and committed
//! as a single batch. Outcomes of submissions are [`VerifyResult`]s; a
//! [`LedgerError`] is returned only when the store itself fails, and the
//! caller must stop.
//!
//! The state machine is synchronous. [`crate::service::LedgerService`]
//! drives it from a mailbox and broadcasts the events it queues.

use std::collections::HashMap;
use std::sync::Arc;

use keel_store::{Snapshot, Store, StoreError};
use keel_types::{
    Block, BlockState, Hash256, HashIndexState, Header, HeaderHashList, ProtocolParams, PublicKey,
    Timestamp, Transaction,
};

use crate::engine::ScriptEngine;
use crate::event::LedgerEvent;
use crate::genesis::genesis_block;
use crate::mempool::{fee_rate, MemoryPool};
use crate::orphan::OrphanPool;
use crate::persist::apply_block;
use crate::reader::{ChainState, LedgerReader, SharedChain};
use crate::validators::{consensus_address, next_validators};
use crate::verify::{
    check_block_structure, verify_block_transactions, verify_header, verify_transaction,
};
use crate::{LedgerError, VerifyResult};

/// Header hashes per persisted [`HeaderHashList`] chunk.
pub const HEADER_CHUNK_SIZE: usize = 2000;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub params: ProtocolParams,
    pub standby_validators: Vec<PublicKey>,
    pub max_orphans: usize,
    pub orphan_max_age_secs: u64,
}

impl LedgerConfig {
    pub fn new(params: ProtocolParams, standby_validators: Vec<PublicKey>) -> Self {
        Self {
            params,
            standby_validators,
            max_orphans: 10_000,
            orphan_max_age_secs: 3_600,
        }
    }
}

pub struct Blockchain {
    store: Arc<dyn Store>,
    params: ProtocolParams,
    standby: Arc<[PublicKey]>,
    engine: Arc<dyn ScriptEngine>,
    header_index: Vec<Hash256>,
    /// Prefix of `header_index` already written as `HeaderHashList` chunks.
    stored_header_count: usize,
    height: u32,
    current_block_hash: Hash256,
    block_cache: HashMap<Hash256, Block>,
    orphans: OrphanPool,
    orphan_max_age_secs: u64,
    mempool: MemoryPool,
    shared: SharedChain,
    events: Vec<LedgerEvent>,
}

impl Blockchain {
    /// Open the ledger over `store`, writing genesis into an empty store.
    ///
    /// A store whose first block differs from the genesis derived from the
    /// configured standby validators is refused.
    pub fn open(
        store: Arc<dyn Store>,
        config: LedgerConfig,
        engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, LedgerError> {
        let genesis = genesis_block(&config.standby_validators);
        let mut chain = Self {
            store,
            mempool: MemoryPool::new(config.params.mempool_capacity)
                .with_min_fee_rate(config.params.min_fee_rate.raw()),
            params: config.params,
            standby: config.standby_validators.into(),
            engine,
            header_index: Vec::new(),
            stored_header_count: 0,
            height: 0,
            current_block_hash: Hash256::ZERO,
            block_cache: HashMap::new(),
            orphans: OrphanPool::new(config.max_orphans),
            orphan_max_age_secs: config.orphan_max_age_secs,
            shared: SharedChain::new(ChainState::default()),
            events: Vec::new(),
        };

        let snapshot = chain.snapshot()?;
        match snapshot.block_hash_index.try_get()? {
            None => {
                let hash = genesis.hash();
                chain.persist(genesis, false)?;
                tracing::info!(%hash, "genesis block written");
            }
            Some(tip) => {
                chain.load_header_index(&snapshot)?;
                let stored = chain.header_index.first().copied().unwrap_or_default();
                if stored != genesis.hash() {
                    return Err(LedgerError::GenesisMismatch {
                        stored,
                        expected: genesis.hash(),
                    });
                }
                chain.height = tip.index;
                chain.current_block_hash = tip.hash;
                chain.publish();
                tracing::info!(
                    height = chain.height,
                    header_height = chain.header_height(),
                    "ledger loaded"
                );
            }
        }
        chain.events.clear();
        Ok(chain)
    }

    fn load_header_index(&mut self, snapshot: &Snapshot) -> Result<(), LedgerError> {
        for (_, chunk) in snapshot.header_hash_list.find(&[])? {
            self.header_index.extend(chunk.hashes);
        }
        self.stored_header_count = self.header_index.len();

        let Some(tip) = snapshot.header_hash_index.try_get()? else {
            return Err(LedgerError::Corruption("header pointer missing".into()));
        };
        // Walk back from the header tip to the last chunked hash.
        let mut tail = Vec::new();
        let mut hash = tip.hash;
        while self.header_index.len() + tail.len() <= tip.index as usize {
            tail.push(hash);
            let header = snapshot
                .get_header(&hash)?
                .ok_or_else(|| LedgerError::Corruption(format!("header {hash} missing")))?;
            hash = header.prev_hash;
        }
        if let Some(last) = self.header_index.last() {
            if !tail.is_empty() && *last != hash {
                return Err(LedgerError::Corruption(format!(
                    "header chain does not link to chunked hash {last}"
                )));
            }
        }
        tail.reverse();
        self.header_index.extend(tail);
        Ok(())
    }

    /// A snapshot of the committed state.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Snapshot::new(Arc::clone(&self.store))
    }

    pub fn reader(&self) -> LedgerReader {
        LedgerReader::new(
            Arc::clone(&self.store),
            self.shared.clone(),
            Arc::clone(&self.standby),
            self.params.max_validators,
        )
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn header_height(&self) -> u32 {
        self.header_index.len().saturating_sub(1) as u32
    }

    pub fn current_block_hash(&self) -> Hash256 {
        self.current_block_hash
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn cached_block_count(&self) -> usize {
        self.block_cache.len()
    }

    /// Events queued since the last call, in the order they happened.
    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Submit a block from a peer, from consensus or from a local caller.
    ///
    /// Blocks that link to the persisted tip are applied immediately,
    /// followed by any cached or buffered descendants. Blocks further ahead
    /// are cached when their header is known and buffered as orphans
    /// otherwise.
    pub fn on_new_block(&mut self, block: Block) -> Result<VerifyResult, LedgerError> {
        let now = Timestamp::now().as_secs();
        let result = self.process_block(block, now)?;
        if result.is_success() {
            self.replay_orphans(now)?;
        }
        Ok(result)
    }

    fn process_block(&mut self, block: Block, now: u64) -> Result<VerifyResult, LedgerError> {
        let index = block.index();
        let hash = block.hash();
        let header_len = self.header_index.len();

        if index <= self.height || self.block_cache.contains_key(&hash) {
            return Ok(VerifyResult::AlreadyExists);
        }
        if index as usize > header_len {
            if self.orphans.insert(block, now) {
                tracing::debug!(%hash, index, orphans = self.orphans.len(), "buffered orphan block");
            }
            return Ok(VerifyResult::UnableToVerify);
        }

        if index as usize == header_len {
            match verify_header(&block.header, &self.snapshot()?) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%hash, index, "block header rejected");
                    return Ok(VerifyResult::Invalid);
                }
                Err(e) => {
                    tracing::error!(%hash, error = %e, "state read failed during header verification");
                    return Ok(VerifyResult::UnableToVerify);
                }
            }
        } else if self.header_index[index as usize] != hash {
            return Ok(VerifyResult::Invalid);
        }
        if !check_block_structure(&block) {
            tracing::debug!(%hash, index, "malformed block rejected");
            return Ok(VerifyResult::Invalid);
        }

        let accepted = Arc::new(block.clone());
        if index == self.height + 1 {
            if !self.persist(block, true)? {
                return Ok(VerifyResult::Invalid);
            }
            self.drain_block_cache()?;
        } else {
            if index as usize == header_len {
                self.store_header(&block.header)?;
            }
            tracing::debug!(%hash, index, "cached block ahead of tip");
            self.block_cache.insert(hash, block);
        }
        self.events.push(LedgerEvent::BlockAccepted(accepted));
        Ok(VerifyResult::Succeed)
    }

    /// Persist cached blocks that now link to the tip.
    fn drain_block_cache(&mut self) -> Result<(), LedgerError> {
        while let Some(next) = self.header_index.get(self.height as usize + 1).copied() {
            let Some(block) = self.block_cache.remove(&next) else {
                break;
            };
            if !self.persist(block, true)? {
                break;
            }
        }
        let height = self.height;
        self.block_cache.retain(|_, b| b.index() > height);
        Ok(())
    }

    /// Resubmit orphans whose parent is now the block tip or the header tip.
    fn replay_orphans(&mut self, now: u64) -> Result<(), LedgerError> {
        loop {
            let parents = [
                (self.current_block_hash, self.height),
                (
                    self.header_index.last().copied().unwrap_or_default(),
                    self.header_height(),
                ),
            ];
            let mut ready = Vec::new();
            for (parent, parent_index) in parents {
                ready.extend(
                    self.orphans
                        .take_dependents(&parent)
                        .into_iter()
                        .filter(|b| Some(b.index()) == parent_index.checked_add(1)),
                );
            }
            if ready.is_empty() {
                return Ok(());
            }
            for block in ready {
                let hash = block.hash();
                let result = self.process_block(block, now)?;
                tracing::debug!(%hash, %result, "replayed orphan block");
            }
        }
    }

    /// Validate and commit `block` on top of the tip.
    ///
    /// Returns `false` if the block fails transaction or next-consensus
    /// validation. Commit failures are returned as errors.
    fn persist(&mut self, block: Block, verify: bool) -> Result<bool, LedgerError> {
        let hash = block.hash();
        let index = block.index();
        let mut snapshot = self.snapshot()?;

        if verify {
            if !verify_block_transactions(&block, &snapshot, &self.params)? {
                tracing::warn!(%hash, index, "block transactions failed verification");
                return Ok(false);
            }
            let validators = next_validators(
                &snapshot,
                &self.standby,
                &block.transactions,
                self.params.max_validators,
            )?;
            if consensus_address(&validators) != block.header.next_consensus {
                tracing::warn!(%hash, index, "block names the wrong next consensus");
                return Ok(false);
            }
        }

        let results = apply_block(&mut snapshot, &block, &self.params, self.engine.as_ref())?;
        if index as usize == self.header_index.len() {
            self.header_index.push(hash);
            snapshot.header_hash_index.put(HashIndexState { hash, index });
        }
        self.stage_header_chunks(&mut snapshot)?;
        if let Err(e) = snapshot.commit() {
            tracing::error!(%hash, height = index, error = %e, "block commit failed");
            return Err(e.into());
        }

        self.height = index;
        self.current_block_hash = hash;
        self.mempool.on_persist_completed(&block);
        self.publish();
        tracing::info!(
            height = index,
            %hash,
            transactions = block.transactions.len(),
            "block persisted"
        );
        self.events.push(LedgerEvent::PersistCompleted {
            block: Arc::new(block),
            results: Arc::new(results),
        });
        Ok(true)
    }

    fn stage_header(&mut self, snapshot: &mut Snapshot, header: &Header) -> Result<(), LedgerError> {
        let hash = header.hash();
        snapshot.blocks.add(
            hash,
            BlockState {
                system_fee_amount: 0,
                trimmed: header.trim(),
            },
        )?;
        self.header_index.push(hash);
        snapshot.header_hash_index.put(HashIndexState {
            hash,
            index: header.index,
        });
        Ok(())
    }

    fn stage_header_chunks(&mut self, snapshot: &mut Snapshot) -> Result<(), LedgerError> {
        while self.header_index.len() - self.stored_header_count >= HEADER_CHUNK_SIZE {
            let start = self.stored_header_count;
            let hashes = self.header_index[start..start + HEADER_CHUNK_SIZE].to_vec();
            snapshot
                .header_hash_list
                .add(start as u32, HeaderHashList { hashes })?;
            self.stored_header_count += HEADER_CHUNK_SIZE;
        }
        Ok(())
    }

    fn store_header(&mut self, header: &Header) -> Result<(), LedgerError> {
        let mut snapshot = self.snapshot()?;
        self.stage_header(&mut snapshot, header)?;
        self.stage_header_chunks(&mut snapshot)?;
        snapshot.commit()?;
        self.publish();
        self.events.push(LedgerEvent::HeadersExtended {
            header_height: self.header_height(),
        });
        Ok(())
    }

    /// Extend the header chain. Headers already indexed are skipped; the
    /// first header that does not link or verify ends the batch. Returns
    /// how many headers were added.
    pub fn on_new_headers(&mut self, headers: &[Header]) -> Result<usize, LedgerError> {
        let mut snapshot = self.snapshot()?;
        let mut added = 0;
        for header in headers {
            let index = header.index as usize;
            if index < self.header_index.len() {
                continue;
            }
            if index > self.header_index.len() {
                break;
            }
            match verify_header(header, &snapshot) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(index, "header rejected");
                    break;
                }
                Err(e) => {
                    tracing::error!(index, error = %e, "state read failed during header verification");
                    break;
                }
            }
            self.stage_header(&mut snapshot, header)?;
            added += 1;
        }

        if added > 0 {
            self.stage_header_chunks(&mut snapshot)?;
            snapshot.commit()?;
            self.publish();
            tracing::debug!(added, header_height = self.header_height(), "header chain extended");
            self.events.push(LedgerEvent::HeadersExtended {
                header_height: self.header_height(),
            });
            self.replay_orphans(Timestamp::now().as_secs())?;
        }
        Ok(added)
    }

    /// Validate a loose transaction and admit it to the memory pool.
    pub fn on_new_transaction(&mut self, tx: Transaction) -> VerifyResult {
        let hash = tx.hash();
        let result = self.admit_transaction(hash, tx);
        if !result.is_success() && result != VerifyResult::AlreadyExists {
            self.events
                .push(LedgerEvent::TransactionRejected { hash, result });
        }
        result
    }

    fn admit_transaction(&mut self, hash: Hash256, tx: Transaction) -> VerifyResult {
        if self.mempool.contains(&hash) {
            return VerifyResult::AlreadyExists;
        }
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(%hash, error = %e, "could not open a snapshot for transaction checks");
                return VerifyResult::UnableToVerify;
            }
        };
        match snapshot.contains_transaction(&hash) {
            Ok(true) => return VerifyResult::AlreadyExists,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(%hash, error = %e, "state read failed during transaction lookup");
                return VerifyResult::UnableToVerify;
            }
        }

        let pool = &self.mempool;
        let network_fee = match verify_transaction(&tx, &snapshot, &self.params, |input| {
            pool.is_conflicting(input, None)
        }) {
            Ok(fee) => fee,
            Err(result) => {
                tracing::debug!(%hash, %result, "transaction rejected");
                return result;
            }
        };

        let min_rate = self.params.min_fee_rate.raw();
        if fee_rate(&tx, network_fee) < min_rate
            && self.mempool.low_priority_count() >= self.params.free_tx_slots
        {
            tracing::debug!(%hash, "low-fee transaction refused, free slots exhausted");
            return VerifyResult::PolicyFail;
        }

        let result = self.mempool.try_add(tx.clone(), network_fee, Timestamp::now());
        if result.is_success() {
            tracing::debug!(%hash, pool = self.mempool.len(), "transaction accepted");
            self.events.push(LedgerEvent::TransactionAccepted(Arc::new(tx)));
        }
        result
    }

    /// Re-check a batch of unverified pool entries against the tip.
    /// Returns `(reverified, dropped)`.
    pub fn reverify_pool(&mut self) -> (usize, usize) {
        if self.mempool.len_unverified() == 0 {
            return (0, 0);
        }
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "could not open a snapshot for pool reverification");
                return (0, 0);
            }
        };
        let params = &self.params;
        let (kept, dropped) = self
            .mempool
            .reverify(params.max_reverify_per_tick, |tx, pool| {
                let hash = tx.hash();
                verify_transaction(tx, &snapshot, params, |input| {
                    pool.is_conflicting(input, Some(&hash))
                })
                .is_ok()
            });
        tracing::debug!(
            kept,
            dropped,
            unverified = self.mempool.len_unverified(),
            "memory pool reverified"
        );
        (kept, dropped)
    }

    pub fn expire_orphans(&mut self, now: u64) -> usize {
        let removed = self.orphans.clear_expired(self.orphan_max_age_secs, now);
        if removed > 0 {
            tracing::debug!(removed, "expired orphan blocks");
        }
        removed
    }

    /// Apply trusted blocks in order without validation or relay.
    ///
    /// Blocks at or below the current height are skipped. Returns the
    /// number of blocks applied.
    pub fn import(&mut self, blocks: Vec<Block>) -> Result<u32, LedgerError> {
        let mut imported = 0;
        for block in blocks {
            let index = block.index();
            if index <= self.height {
                continue;
            }
            let expected = self.height + 1;
            if index != expected {
                return Err(LedgerError::ImportGap {
                    expected,
                    actual: index,
                });
            }
            if let Some(known) = self.header_index.get(index as usize) {
                if *known != block.hash() {
                    return Err(LedgerError::ImportRejected { index });
                }
            }
            if !self.persist(block, false)? {
                return Err(LedgerError::ImportRejected { index });
            }
            imported += 1;
        }
        self.drain_block_cache()?;
        Ok(imported)
    }

    fn publish(&self) {
        let mut state = self.shared.write();
        state.height = self.height;
        state.current_block_hash = self.current_block_hash;
        if let Some(new) = self.header_index.get(state.header_index.len()..) {
            state.header_index.extend_from_slice(new);
        }
    }
}
