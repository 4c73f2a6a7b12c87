//! State of one consensus round.
//!
//! The context is rebuilt for every height and partially reset on every
//! view change. Per-validator knowledge lives in slot arrays indexed by the
//! validator's position in the sorted validator list, allocated once per
//! height.

use std::collections::HashMap;

use keel_types::{
    merkle_root, Block, Hash256, Header, PublicKey, ScriptHash, Signature, Timestamp, Transaction,
    TransactionKind, Witness,
};

/// Where a height's round starts from.
#[derive(Clone, Debug)]
pub struct RoundStart {
    /// Height being agreed on (current height + 1).
    pub block_index: u32,
    pub prev_hash: Hash256,
    pub prev_timestamp: Timestamp,
    pub validators: Vec<PublicKey>,
}

/// The miner transaction a proposal with `nonce` starts with.
pub fn miner_transaction(nonce: u64) -> Transaction {
    Transaction::new(TransactionKind::Miner {
        nonce: nonce as u32,
    })
}

#[derive(Debug)]
pub struct ConsensusContext {
    block_index: u32,
    prev_hash: Hash256,
    prev_timestamp: Timestamp,
    view: u8,
    validators: Vec<PublicKey>,
    my_index: Option<usize>,

    timestamp: Timestamp,
    nonce: u64,
    next_consensus: ScriptHash,
    tx_hashes: Option<Vec<Hash256>>,
    transactions: HashMap<Hash256, Transaction>,

    preparations: Box<[Option<Signature>]>,
    commits: Box<[Option<Signature>]>,
    expected_view: Box<[u8]>,
    block_sent: bool,
}

impl ConsensusContext {
    /// An idle context; [`reset`](Self::reset) starts the first round.
    pub fn new() -> Self {
        Self {
            block_index: 0,
            prev_hash: Hash256::ZERO,
            prev_timestamp: Timestamp::EPOCH,
            view: 0,
            validators: Vec::new(),
            my_index: None,
            timestamp: Timestamp::EPOCH,
            nonce: 0,
            next_consensus: ScriptHash::default(),
            tx_hashes: None,
            transactions: HashMap::new(),
            preparations: Box::new([]),
            commits: Box::new([]),
            expected_view: Box::new([]),
            block_sent: false,
        }
    }

    /// Start a new height at view 0.
    pub fn reset(&mut self, start: RoundStart, me: Option<&PublicKey>) {
        let mut validators = start.validators;
        validators.sort();
        validators.dedup();
        let n = validators.len();

        self.my_index = me.and_then(|key| validators.iter().position(|v| v == key));
        self.block_index = start.block_index;
        self.prev_hash = start.prev_hash;
        self.prev_timestamp = start.prev_timestamp;
        self.validators = validators;
        self.view = 0;
        self.clear_proposal();
        self.preparations = vec![None; n].into_boxed_slice();
        self.commits = vec![None; n].into_boxed_slice();
        self.expected_view = vec![0; n].into_boxed_slice();
        self.block_sent = false;
    }

    /// Move to `view` at the same height. Expected views are kept.
    pub fn change_view(&mut self, view: u8) {
        self.view = view;
        self.clear_proposal();
        self.preparations.fill(None);
        self.commits.fill(None);
        if let Some(me) = self.my_index {
            self.expected_view[me] = self.expected_view[me].max(view);
        }
    }

    fn clear_proposal(&mut self) {
        self.timestamp = Timestamp::EPOCH;
        self.nonce = 0;
        self.next_consensus = ScriptHash::default();
        self.tx_hashes = None;
        self.transactions.clear();
    }

    pub fn block_index(&self) -> u32 {
        self.block_index
    }

    pub fn prev_hash(&self) -> &Hash256 {
        &self.prev_hash
    }

    pub fn prev_timestamp(&self) -> Timestamp {
        self.prev_timestamp
    }

    pub fn view(&self) -> u8 {
        self.view
    }

    pub fn validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn my_index(&self) -> Option<usize> {
        self.my_index
    }

    pub fn n(&self) -> usize {
        self.validators.len()
    }

    /// Faulty validators tolerated.
    pub fn f(&self) -> usize {
        self.n().saturating_sub(1) / 3
    }

    /// Signatures needed for agreement.
    pub fn m(&self) -> usize {
        self.n() - self.f()
    }

    /// Index of the validator proposing at `view`.
    pub fn primary_index(&self, view: u8) -> usize {
        let n = self.n().max(1) as i64;
        (self.block_index as i64 - view as i64).rem_euclid(n) as usize
    }

    pub fn is_primary(&self) -> bool {
        self.my_index == Some(self.primary_index(self.view))
    }

    pub fn is_backup(&self) -> bool {
        self.my_index.is_some() && !self.is_primary()
    }

    pub fn watch_only(&self) -> bool {
        self.my_index.is_none()
    }

    pub fn request_sent_or_received(&self) -> bool {
        self.tx_hashes.is_some()
    }

    pub fn response_sent(&self) -> bool {
        self.is_backup() && self.my_slot(&self.preparations).is_some()
    }

    pub fn commit_sent(&self) -> bool {
        self.my_slot(&self.commits).is_some()
    }

    pub fn block_sent(&self) -> bool {
        self.block_sent
    }

    pub fn view_changing(&self) -> bool {
        self.my_index
            .is_some_and(|me| self.expected_view[me] > self.view)
    }

    fn my_slot(&self, slots: &[Option<Signature>]) -> Option<Signature> {
        self.my_index.and_then(|me| slots[me])
    }

    pub fn expected_view(&self, index: usize) -> u8 {
        self.expected_view[index]
    }

    /// Record that validator `index` asked for `view`. Returns `false` when
    /// it had already asked for that view or a later one.
    pub(crate) fn set_expected_view(&mut self, index: usize, view: u8) -> bool {
        if view <= self.expected_view[index] {
            return false;
        }
        self.expected_view[index] = view;
        true
    }

    /// Validators asking for exactly `view`.
    pub fn expected_view_count(&self, view: u8) -> usize {
        self.expected_view.iter().filter(|v| **v == view).count()
    }

    pub fn preparation(&self, index: usize) -> Option<Signature> {
        self.preparations[index]
    }

    pub fn commit(&self, index: usize) -> Option<Signature> {
        self.commits[index]
    }

    pub(crate) fn set_preparation(&mut self, index: usize, signature: Signature) {
        self.preparations[index] = Some(signature);
    }

    pub(crate) fn set_commit(&mut self, index: usize, signature: Signature) {
        self.commits[index] = Some(signature);
    }

    pub fn preparation_count(&self) -> usize {
        self.preparations.iter().flatten().count()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.iter().flatten().count()
    }

    /// Drop stored signatures that do not satisfy `valid`.
    pub(crate) fn retain_signatures(&mut self, valid: impl Fn(usize, &Signature) -> bool) {
        for slots in [&mut self.preparations, &mut self.commits] {
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.as_ref().is_some_and(|sig| !valid(index, sig)) {
                    *slot = None;
                }
            }
        }
    }

    pub(crate) fn mark_block_sent(&mut self) {
        self.block_sent = true;
    }

    pub(crate) fn set_proposal(
        &mut self,
        timestamp: Timestamp,
        nonce: u64,
        next_consensus: ScriptHash,
        tx_hashes: Vec<Hash256>,
    ) {
        self.timestamp = timestamp;
        self.nonce = nonce;
        self.next_consensus = next_consensus;
        self.tx_hashes = Some(tx_hashes);
        self.transactions.clear();
    }

    pub(crate) fn clear_request(&mut self) {
        self.clear_proposal();
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn next_consensus(&self) -> ScriptHash {
        self.next_consensus
    }

    pub fn tx_hashes(&self) -> Option<&[Hash256]> {
        self.tx_hashes.as_deref()
    }

    pub fn wants(&self, hash: &Hash256) -> bool {
        self.tx_hashes
            .as_ref()
            .is_some_and(|hashes| hashes.contains(hash))
            && !self.transactions.contains_key(hash)
    }

    pub(crate) fn transactions(&self) -> &HashMap<Hash256, Transaction> {
        &self.transactions
    }

    pub(crate) fn insert_transaction(&mut self, tx: Transaction) {
        self.transactions.insert(tx.hash(), tx);
    }

    /// Proposal hashes whose transactions are not yet known.
    pub fn missing_transactions(&self) -> Vec<Hash256> {
        self.tx_hashes
            .iter()
            .flatten()
            .filter(|h| !self.transactions.contains_key(h))
            .copied()
            .collect()
    }

    pub fn has_all_transactions(&self) -> bool {
        self.tx_hashes
            .as_ref()
            .is_some_and(|hashes| hashes.iter().all(|h| self.transactions.contains_key(h)))
    }

    /// Proposal transactions in proposal order, once all are known.
    pub fn ordered_transactions(&self) -> Option<Vec<Transaction>> {
        self.tx_hashes
            .as_ref()?
            .iter()
            .map(|h| self.transactions.get(h).cloned())
            .collect()
    }

    /// Header of the proposed block, without witness.
    pub fn header(&self) -> Option<Header> {
        let hashes = self.tx_hashes.as_ref()?;
        Some(Header {
            version: 0,
            prev_hash: self.prev_hash,
            merkle_root: merkle_root(hashes),
            timestamp: self.timestamp,
            index: self.block_index,
            consensus_data: self.nonce,
            next_consensus: self.next_consensus,
            witness: Witness::default(),
        })
    }

    /// Hash of the proposed block; what preparations and commits sign.
    pub fn block_hash(&self) -> Option<Hash256> {
        self.header().map(|h| h.hash())
    }

    /// The proposed block carrying `witness`, once every transaction is known.
    pub fn make_block(&self, witness: Witness) -> Option<Block> {
        let mut header = self.header()?;
        header.witness = witness;
        Some(Block {
            header,
            transactions: self.ordered_transactions()?,
        })
    }

    pub fn commits(&self) -> &[Option<Signature>] {
        &self.commits
    }
}

impl Default for ConsensusContext {
    fn default() -> Self {
        Self::new()
    }
}
