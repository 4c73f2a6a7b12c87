use thiserror::Error;

use keel_ledger::LedgerError;
use keel_store::StoreError;
use keel_types::TypeError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("malformed consensus message: {0}")]
    Malformed(#[from] TypeError),

    #[error("ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("state read failed: {0}")]
    Storage(#[from] StoreError),

    #[error("previous block {0} is not stored")]
    MissingPrevious(String),
}
