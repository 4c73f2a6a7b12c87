//! The consensus actor.
//!
//! Drives a [`ConsensusCore`] from consensus payloads relayed by sessions,
//! ledger events and the round timer, and carries out the actions it
//! returns against the ledger, the local node and the task manager.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Sleep};

use keel_ledger::{
    consensus_address, next_validators, LedgerEvent, LedgerHandle, LedgerReader,
};
use keel_network::{LocalNodeHandle, TaskManagerHandle};
use keel_protocol::InvPayload;
use keel_store::StoreError;
use keel_types::{
    ConsensusPayload, Hash256, InventoryType, KeyPair, ScriptHash, Timestamp, Transaction,
};

use crate::context::RoundStart;
use crate::dbft::{ChainAccess, ConsensusAction, ConsensusCore};
use crate::error::ConsensusError;

/// Capacity of the channel sessions push consensus payloads into.
pub const PAYLOAD_CHANNEL_CAPACITY: usize = 1024;
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

impl ChainAccess for LedgerReader {
    fn next_consensus(&self, transactions: &[Transaction]) -> Result<ScriptHash, StoreError> {
        let validators = next_validators(
            &self.snapshot()?,
            self.standby_validators(),
            transactions,
            self.max_validators(),
        )?;
        Ok(consensus_address(&validators))
    }

    fn is_on_chain(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.contains_transaction(hash)
    }
}

/// Progress published for metrics and status queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub height: u32,
    pub view: u8,
    pub views_changed: u64,
}

pub struct ConsensusService {
    core: ConsensusCore,
    reader: LedgerReader,
    ledger: LedgerHandle,
    node: LocalNodeHandle,
    tasks: TaskManagerHandle,
    payloads: mpsc::Receiver<ConsensusPayload>,
    ledger_events: broadcast::Receiver<LedgerEvent>,
    status: watch::Sender<ConsensusStatus>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConsensusService {
    /// `key` is the validator key; without one, or with a key outside the
    /// validator set, the service only follows heights.
    pub fn new(
        key: Option<KeyPair>,
        seconds_per_block: u64,
        ledger: LedgerHandle,
        node: LocalNodeHandle,
        tasks: TaskManagerHandle,
        payloads: mpsc::Receiver<ConsensusPayload>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, watch::Receiver<ConsensusStatus>) {
        let reader = ledger.reader().clone();
        let (status, status_rx) = watch::channel(ConsensusStatus::default());
        let service = Self {
            core: ConsensusCore::new(key, Arc::new(reader.clone()), seconds_per_block),
            ledger_events: ledger.subscribe(),
            reader,
            ledger,
            node,
            tasks,
            payloads,
            status,
            shutdown_rx,
        };
        (service, status_rx)
    }

    pub async fn run(mut self) -> Result<(), ConsensusError> {
        let timer = tokio::time::sleep(self.core.timeout(0));
        tokio::pin!(timer);
        let actions = self.start_round()?;
        self.execute(actions, timer.as_mut()).await;

        loop {
            let actions = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("consensus shutting down");
                    break;
                }
                event = self.ledger_events.recv() => match event {
                    Ok(LedgerEvent::PersistCompleted { block, .. })
                        if block.index() >= self.core.context().block_index() =>
                    {
                        self.start_round()?
                    }
                    Ok(LedgerEvent::TransactionAccepted(tx)) => {
                        self.core.add_transactions(vec![(*tx).clone()], Timestamp::now())
                    }
                    Ok(_) => Vec::new(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "consensus lagged behind ledger events");
                        if self.reader.current_height() >= self.core.context().block_index() {
                            self.start_round()?
                        } else {
                            Vec::new()
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                payload = self.payloads.recv() => match payload {
                    Some(payload) => self.core.on_payload(payload, Timestamp::now()),
                    None => break,
                },
                _ = &mut timer => {
                    let view = self.core.context().view();
                    timer.as_mut().reset(Instant::now() + self.core.timeout(view));
                    let candidates = if self.core.needs_proposal() {
                        self.ledger.verified_transactions().await.unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "no pool transactions for the proposal");
                            Vec::new()
                        })
                    } else {
                        Vec::new()
                    };
                    self.core.on_timer(Timestamp::now(), candidates)
                }
            };
            self.execute(actions, timer.as_mut()).await;
        }
        Ok(())
    }

    fn start_round(&mut self) -> Result<Vec<ConsensusAction>, ConsensusError> {
        let hash = self.reader.current_block_hash();
        let prev = self
            .reader
            .header(&hash)?
            .ok_or_else(|| ConsensusError::MissingPrevious(hash.to_string()))?;
        let validators = self.reader.next_validators()?;
        if consensus_address(&validators) != prev.next_consensus {
            tracing::warn!(
                height = prev.index,
                "validator set does not match the previous block's next consensus"
            );
        }
        let actions = self.core.start_round(
            RoundStart {
                block_index: prev.index + 1,
                prev_hash: hash,
                prev_timestamp: prev.timestamp,
                validators,
            },
            Timestamp::now(),
        );
        let height = self.core.context().block_index();
        self.status.send_modify(|s| {
            s.height = height;
            s.view = 0;
        });
        Ok(actions)
    }

    async fn execute(&mut self, actions: Vec<ConsensusAction>, mut timer: Pin<&mut Sleep>) {
        let mut queue: VecDeque<ConsensusAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                ConsensusAction::Broadcast(payload) => {
                    let hash = payload.hash();
                    let result = self.node.relay_consensus(payload).await;
                    tracing::trace!(%hash, %result, "consensus payload relayed");
                }
                ConsensusAction::SetTimer(after) => {
                    timer.as_mut().reset(Instant::now() + after);
                }
                ConsensusAction::FetchTransactions(hashes) => {
                    let found = self
                        .ledger
                        .pool_transactions(hashes.clone())
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "pool lookup failed");
                            Vec::new()
                        });
                    let mut present = Vec::new();
                    let mut missing = Vec::new();
                    for (i, hash) in hashes.iter().enumerate() {
                        match found.get(i).cloned().flatten() {
                            Some(tx) => present.push(tx),
                            None => missing.push(*hash),
                        }
                    }
                    if !missing.is_empty() {
                        tracing::debug!(
                            missing = missing.len(),
                            "requesting proposal transactions from peers"
                        );
                        for inv in InvPayload::chunked(InventoryType::Tx, &missing) {
                            self.tasks.restart_tasks(inv).await;
                        }
                    }
                    queue.extend(self.core.add_transactions(present, Timestamp::now()));
                }
                ConsensusAction::SubmitBlock(block) => {
                    let hash = block.hash();
                    match self.ledger.submit_block_timeout(block, SUBMIT_TIMEOUT).await {
                        Ok(result) => tracing::info!(%hash, %result, "agreed block submitted"),
                        Err(e) => tracing::error!(%hash, error = %e, "agreed block not submitted"),
                    }
                }
                ConsensusAction::ViewChanged { view } => {
                    self.status.send_modify(|s| {
                        s.view = view;
                        s.views_changed += 1;
                    });
                }
            }
        }
    }
}
