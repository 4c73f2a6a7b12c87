//! Events broadcast by the ledger service.

use std::sync::Arc;

use keel_types::{Block, Hash256, Transaction};

use crate::engine::ApplicationExecuted;
use crate::result::VerifyResult;

#[derive(Clone, Debug)]
pub enum LedgerEvent {
    /// A block was committed. Emitted exactly once per height.
    PersistCompleted {
        block: Arc<Block>,
        results: Arc<Vec<ApplicationExecuted>>,
    },
    /// A submitted block passed validation and should be relayed.
    BlockAccepted(Arc<Block>),
    /// A transaction entered the memory pool and should be relayed.
    TransactionAccepted(Arc<Transaction>),
    /// A transaction was refused for a reason other than being known already.
    TransactionRejected { hash: Hash256, result: VerifyResult },
    /// The header chain grew.
    HeadersExtended { header_height: u32 },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::PersistCompleted { .. } => "persist_completed",
            LedgerEvent::BlockAccepted(_) => "block_accepted",
            LedgerEvent::TransactionAccepted(_) => "transaction_accepted",
            LedgerEvent::TransactionRejected { .. } => "transaction_rejected",
            LedgerEvent::HeadersExtended { .. } => "headers_extended",
        }
    }
}
