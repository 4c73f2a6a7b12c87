//! The dBFT round state machine.
//!
//! [`ConsensusCore`] owns the [`ConsensusContext`] and the validator key.
//! Inputs (payloads, timer expiry, arriving transactions, a new height) go
//! in; [`ConsensusAction`]s come out for the service to carry out. The core
//! does no I/O of its own beyond read-only chain queries through
//! [`ChainAccess`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keel_crypto::{sign_hash, sign_payload, verify_hash, verify_payload, witness_from_signatures};
use keel_store::StoreError;
use keel_types::{
    Block, ConsensusPayload, Contract, Hash256, KeyPair, ScriptHash, Signature, Timestamp,
    Transaction, MAX_BLOCK_TRANSACTIONS,
};

use crate::context::{miner_transaction, ConsensusContext, RoundStart};
use crate::messages::{ChangeView, Commit, ConsensusMessage, PrepareRequest, PrepareResponse};

/// Proposals timestamped further ahead than this are refused.
pub const MAX_FUTURE_SECS: u64 = 600;

/// Read-only chain queries the round needs.
pub trait ChainAccess: Send + Sync {
    /// Script hash of the validator contract that follows a block carrying
    /// `transactions`.
    fn next_consensus(&self, transactions: &[Transaction]) -> Result<ScriptHash, StoreError>;

    fn is_on_chain(&self, hash: &Hash256) -> Result<bool, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusAction {
    /// Relay a signed payload to the other validators.
    Broadcast(ConsensusPayload),
    /// Replace the round timer.
    SetTimer(Duration),
    /// Look these proposal transactions up in the pool, and fetch from
    /// peers what the pool lacks.
    FetchTransactions(Vec<Hash256>),
    /// Hand the agreed block to the ledger.
    SubmitBlock(Block),
    ViewChanged { view: u8 },
}

pub struct ConsensusCore {
    ctx: ConsensusContext,
    key: Option<KeyPair>,
    chain: Arc<dyn ChainAccess>,
    seconds_per_block: u64,
}

impl ConsensusCore {
    pub fn new(key: Option<KeyPair>, chain: Arc<dyn ChainAccess>, seconds_per_block: u64) -> Self {
        Self {
            ctx: ConsensusContext::new(),
            key,
            chain,
            seconds_per_block,
        }
    }

    pub fn context(&self) -> &ConsensusContext {
        &self.ctx
    }

    /// Round timer for `view`: `seconds_per_block << (view + 1)`.
    pub fn timeout(&self, view: u8) -> Duration {
        let factor = 1u64.checked_shl(view as u32 + 1).unwrap_or(u64::MAX);
        Duration::from_secs(self.seconds_per_block.saturating_mul(factor))
    }

    /// Whether the next timer expiry should carry pool transactions for a
    /// proposal.
    pub fn needs_proposal(&self) -> bool {
        self.ctx.is_primary()
            && !self.ctx.request_sent_or_received()
            && !self.ctx.commit_sent()
            && !self.ctx.block_sent()
    }

    /// Begin agreeing on `start.block_index` at view 0.
    pub fn start_round(&mut self, start: RoundStart, now: Timestamp) -> Vec<ConsensusAction> {
        let me = self.key.as_ref().map(|k| k.public);
        self.ctx.reset(start, me.as_ref());
        tracing::debug!(
            height = self.ctx.block_index(),
            validators = self.ctx.n(),
            index = ?self.ctx.my_index(),
            "consensus round started"
        );
        let mut out = Vec::new();
        self.initialize(0, now, &mut out);
        out
    }

    pub fn on_timer(&mut self, now: Timestamp, candidates: Vec<Transaction>) -> Vec<ConsensusAction> {
        let mut out = Vec::new();
        if self.ctx.watch_only() || self.ctx.block_sent() {
            return out;
        }
        if self.ctx.commit_sent() {
            // Locked: repeat the commit, never leave the view.
            if let Some(signature) = self.my_commit() {
                let view = self.ctx.view();
                self.broadcast(ConsensusMessage::Commit(Commit { view, signature }), now, &mut out);
                out.push(ConsensusAction::SetTimer(self.timeout(view)));
            }
            return out;
        }
        if self.ctx.is_primary() && !self.ctx.request_sent_or_received() {
            self.propose(candidates, now, &mut out);
        } else {
            self.request_change_view(now, &mut out);
        }
        out
    }

    pub fn on_payload(&mut self, payload: ConsensusPayload, now: Timestamp) -> Vec<ConsensusAction> {
        let mut out = Vec::new();
        if self.ctx.watch_only() || self.ctx.block_sent() {
            return out;
        }
        let Some((index, message)) = self.check_payload(&payload) else {
            return out;
        };
        tracing::trace!(
            height = payload.block_index,
            validator = index,
            message = message.name(),
            view = message.view(),
            "consensus message"
        );
        match message {
            ConsensusMessage::ChangeView(change) => {
                self.on_change_view(index, change, now, &mut out)
            }
            other if other.view() != self.ctx.view() => {}
            ConsensusMessage::PrepareRequest(request) => {
                self.on_prepare_request(index, request, now, &mut out)
            }
            ConsensusMessage::PrepareResponse(response) => {
                self.on_prepare_response(index, response, now, &mut out)
            }
            ConsensusMessage::Commit(commit) => self.on_commit(index, commit, &mut out),
        }
        out
    }

    /// Supply proposal transactions, from the pool or as they are accepted.
    pub fn add_transactions(
        &mut self,
        transactions: Vec<Transaction>,
        now: Timestamp,
    ) -> Vec<ConsensusAction> {
        let mut out = Vec::new();
        if self.ctx.watch_only()
            || !self.ctx.request_sent_or_received()
            || self.ctx.has_all_transactions()
        {
            return out;
        }
        for tx in transactions {
            let hash = tx.hash();
            if !self.ctx.wants(&hash) {
                continue;
            }
            if let Err(reason) = self.admit(&tx) {
                tracing::warn!(%hash, reason, "proposal transaction refused");
                self.reject_proposal(now, &mut out);
                return out;
            }
            self.ctx.insert_transaction(tx);
        }
        if self.ctx.has_all_transactions() {
            self.on_transactions_complete(now, &mut out);
        }
        out
    }

    fn admit(&self, tx: &Transaction) -> Result<(), &'static str> {
        if tx.is_miner() {
            return Err("second miner transaction");
        }
        match self.chain.is_on_chain(&tx.hash()) {
            Ok(false) => {}
            Ok(true) => return Err("already on chain"),
            Err(_) => return Err("state read failed"),
        }
        let conflicts = self
            .ctx
            .transactions()
            .values()
            .any(|other| other.inputs.iter().any(|i| tx.inputs.contains(i)));
        if conflicts {
            return Err("conflicts with another proposal transaction");
        }
        Ok(())
    }

    fn check_payload(&self, payload: &ConsensusPayload) -> Option<(usize, ConsensusMessage)> {
        if payload.block_index != self.ctx.block_index() || payload.prev_hash != *self.ctx.prev_hash() {
            return None;
        }
        let index = payload.validator_index as usize;
        let key = self.ctx.validators().get(index)?;
        if Some(index) == self.ctx.my_index() {
            return None;
        }
        if !verify_payload(payload, key) {
            tracing::debug!(validator = index, "consensus payload signature invalid");
            return None;
        }
        ConsensusMessage::from_bytes(&payload.data).ok().map(|m| (index, m))
    }

    fn initialize(&mut self, view: u8, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        if view > 0 {
            self.ctx.change_view(view);
            tracing::info!(height = self.ctx.block_index(), view, "view changed");
            out.push(ConsensusAction::ViewChanged { view });
        }
        if self.ctx.watch_only() {
            return;
        }
        if self.ctx.is_primary() {
            let due = self.ctx.prev_timestamp().plus_secs(self.seconds_per_block);
            let wait = due.as_secs().saturating_sub(now.as_secs());
            out.push(ConsensusAction::SetTimer(Duration::from_secs(wait)));
        } else {
            out.push(ConsensusAction::SetTimer(self.timeout(view)));
        }
    }

    fn propose(&mut self, candidates: Vec<Transaction>, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        let nonce: u64 = rand::random();
        let mut transactions = vec![miner_transaction(nonce)];
        let mut spent = HashSet::new();
        for tx in candidates {
            if transactions.len() >= MAX_BLOCK_TRANSACTIONS {
                break;
            }
            if tx.is_miner() || tx.inputs.iter().any(|i| spent.contains(i)) {
                continue;
            }
            spent.extend(tx.inputs.iter().copied());
            transactions.push(tx);
        }

        let next_consensus = match self.chain.next_consensus(&transactions) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(error = %e, "cannot compute next validators, skipping proposal");
                self.request_change_view(now, out);
                return;
            }
        };
        let timestamp = now.max(self.ctx.prev_timestamp().plus_secs(1));
        let tx_hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        self.ctx
            .set_proposal(timestamp, nonce, next_consensus, tx_hashes.clone());
        for tx in transactions {
            self.ctx.insert_transaction(tx);
        }

        let Some(signature) = self.sign_block() else {
            return;
        };
        if let Some(me) = self.ctx.my_index() {
            self.ctx.set_preparation(me, signature);
        }
        let view = self.ctx.view();
        tracing::info!(
            height = self.ctx.block_index(),
            view,
            transactions = tx_hashes.len(),
            "sending prepare request"
        );
        self.broadcast(
            ConsensusMessage::PrepareRequest(PrepareRequest {
                view,
                timestamp,
                nonce,
                next_consensus,
                tx_hashes,
                signature,
            }),
            now,
            out,
        );
        out.push(ConsensusAction::SetTimer(self.timeout(view)));
        self.check_prepared(now, out);
    }

    fn on_prepare_request(
        &mut self,
        index: usize,
        request: PrepareRequest,
        now: Timestamp,
        out: &mut Vec<ConsensusAction>,
    ) {
        if self.ctx.request_sent_or_received() || index != self.ctx.primary_index(self.ctx.view()) {
            return;
        }
        if request.timestamp <= self.ctx.prev_timestamp()
            || request.timestamp.as_secs() > now.as_secs().saturating_add(MAX_FUTURE_SECS)
        {
            tracing::debug!(validator = index, timestamp = %request.timestamp, "proposal timestamp out of range");
            return;
        }
        let miner = miner_transaction(request.nonce);
        if request.tx_hashes.first() != Some(&miner.hash())
            || request.tx_hashes.len() > MAX_BLOCK_TRANSACTIONS
        {
            return;
        }
        let unique: HashSet<&Hash256> = request.tx_hashes.iter().collect();
        if unique.len() != request.tx_hashes.len() {
            return;
        }

        self.ctx.set_proposal(
            request.timestamp,
            request.nonce,
            request.next_consensus,
            request.tx_hashes,
        );
        let Some(hash) = self.ctx.block_hash() else {
            return;
        };
        let validators = self.ctx.validators().to_vec();
        if !verify_hash(&hash, &request.signature, &validators[index]) {
            tracing::debug!(validator = index, "proposal signature invalid");
            self.ctx.clear_request();
            return;
        }
        self.ctx.set_preparation(index, request.signature);
        // Signatures that arrived ahead of the proposal must sign this block.
        self.ctx
            .retain_signatures(|i, sig| verify_hash(&hash, sig, &validators[i]));
        self.ctx.insert_transaction(miner);
        tracing::info!(
            height = self.ctx.block_index(),
            view = self.ctx.view(),
            primary = index,
            %hash,
            "prepare request received"
        );

        let missing = self.ctx.missing_transactions();
        if missing.is_empty() {
            self.on_transactions_complete(now, out);
        } else {
            out.push(ConsensusAction::FetchTransactions(missing));
        }
    }

    fn on_transactions_complete(&mut self, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        if self.ctx.is_backup() && !self.ctx.response_sent() {
            let Some(transactions) = self.ctx.ordered_transactions() else {
                return;
            };
            match self.chain.next_consensus(&transactions) {
                Ok(expected) if expected == self.ctx.next_consensus() => {}
                Ok(_) => {
                    tracing::warn!(height = self.ctx.block_index(), "proposal names the wrong next consensus");
                    self.reject_proposal(now, out);
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot check proposal validators");
                    self.reject_proposal(now, out);
                    return;
                }
            }
            let (Some(me), Some(signature)) = (self.ctx.my_index(), self.sign_block()) else {
                return;
            };
            self.ctx.set_preparation(me, signature);
            let view = self.ctx.view();
            self.broadcast(
                ConsensusMessage::PrepareResponse(PrepareResponse { view, signature }),
                now,
                out,
            );
        }
        self.check_prepared(now, out);
    }

    fn on_prepare_response(
        &mut self,
        index: usize,
        response: PrepareResponse,
        now: Timestamp,
        out: &mut Vec<ConsensusAction>,
    ) {
        if self.ctx.preparation(index).is_some() || index == self.ctx.primary_index(self.ctx.view()) {
            return;
        }
        if !self.signs_proposal(index, &response.signature) {
            return;
        }
        self.ctx.set_preparation(index, response.signature);
        self.check_prepared(now, out);
    }

    fn on_commit(&mut self, index: usize, commit: Commit, out: &mut Vec<ConsensusAction>) {
        if self.ctx.commit(index).is_some() || !self.signs_proposal(index, &commit.signature) {
            return;
        }
        self.ctx.set_commit(index, commit.signature);
        self.check_commits(out);
    }

    /// Whether `signature` from validator `index` signs the proposed block.
    /// Before the proposal is known any signature is held for later.
    fn signs_proposal(&self, index: usize, signature: &Signature) -> bool {
        match self.ctx.block_hash() {
            Some(hash) => verify_hash(&hash, signature, &self.ctx.validators()[index]),
            None => true,
        }
    }

    fn on_change_view(
        &mut self,
        index: usize,
        change: ChangeView,
        now: Timestamp,
        out: &mut Vec<ConsensusAction>,
    ) {
        if !self.ctx.set_expected_view(index, change.new_view_number) {
            return;
        }
        self.check_expected_view(change.new_view_number, now, out);
    }

    fn check_expected_view(&mut self, view: u8, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        if view <= self.ctx.view() || self.ctx.commit_sent() {
            return;
        }
        if self.ctx.expected_view_count(view) >= self.ctx.m() {
            self.initialize(view, now, out);
        }
    }

    fn request_change_view(&mut self, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        let Some(me) = self.ctx.my_index() else {
            return;
        };
        let view = self.ctx.view();
        let new_view_number = self.ctx.expected_view(me).max(view).saturating_add(1);
        self.ctx.set_expected_view(me, new_view_number);
        tracing::info!(
            height = self.ctx.block_index(),
            view,
            new_view_number,
            "requesting view change"
        );
        self.broadcast(
            ConsensusMessage::ChangeView(ChangeView {
                view,
                new_view_number,
                timestamp: now,
            }),
            now,
            out,
        );
        out.push(ConsensusAction::SetTimer(self.timeout(new_view_number)));
        self.check_expected_view(new_view_number, now, out);
    }

    fn reject_proposal(&mut self, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        if !self.ctx.view_changing() {
            self.request_change_view(now, out);
        }
    }

    fn check_prepared(&mut self, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        if self.ctx.watch_only()
            || self.ctx.commit_sent()
            || !self.ctx.has_all_transactions()
            || self.ctx.preparation_count() < self.ctx.m()
        {
            return;
        }
        let (Some(me), Some(signature)) = (self.ctx.my_index(), self.sign_block()) else {
            return;
        };
        self.ctx.set_commit(me, signature);
        let view = self.ctx.view();
        tracing::info!(height = self.ctx.block_index(), view, "prepared, sending commit");
        self.broadcast(ConsensusMessage::Commit(Commit { view, signature }), now, out);
        self.check_commits(out);
    }

    fn check_commits(&mut self, out: &mut Vec<ConsensusAction>) {
        if self.ctx.block_sent()
            || !self.ctx.has_all_transactions()
            || self.ctx.commit_count() < self.ctx.m()
        {
            return;
        }
        let contract = Contract::consensus(self.ctx.validators());
        let witness = witness_from_signatures(&contract, self.ctx.commits());
        let Some(block) = self.ctx.make_block(witness) else {
            return;
        };
        self.ctx.mark_block_sent();
        tracing::info!(
            height = block.index(),
            hash = %block.hash(),
            view = self.ctx.view(),
            transactions = block.transactions.len(),
            "block agreed"
        );
        out.push(ConsensusAction::SubmitBlock(block));
    }

    fn my_commit(&self) -> Option<Signature> {
        self.ctx.my_index().and_then(|me| self.ctx.commit(me))
    }

    fn sign_block(&self) -> Option<Signature> {
        let key = self.key.as_ref()?;
        let hash = self.ctx.block_hash()?;
        Some(sign_hash(&hash, &key.private))
    }

    fn broadcast(&self, message: ConsensusMessage, now: Timestamp, out: &mut Vec<ConsensusAction>) {
        let (Some(key), Some(index)) = (self.key.as_ref(), self.ctx.my_index()) else {
            return;
        };
        let mut payload = ConsensusPayload {
            version: 0,
            prev_hash: *self.ctx.prev_hash(),
            block_index: self.ctx.block_index(),
            validator_index: index as u16,
            timestamp: now,
            data: message.to_bytes(),
            signature: Signature([0; 64]),
        };
        payload.signature = sign_payload(&payload, &key.private);
        out.push(ConsensusAction::Broadcast(payload));
    }
}
