use thiserror::Error;

use keel_types::Hash256;

/// Failures of the ledger itself, as opposed to rejected input.
///
/// Rejections of blocks and transactions are reported as
/// [`VerifyResult`](crate::VerifyResult); a `LedgerError` means the node
/// cannot continue safely.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] keel_store::StoreError),

    #[error("stored genesis {stored} does not match configured genesis {expected}")]
    GenesisMismatch { stored: Hash256, expected: Hash256 },

    #[error("import out of order: expected block {expected}, got {actual}")]
    ImportGap { expected: u32, actual: u32 },

    #[error("imported block {index} was rejected")]
    ImportRejected { index: u32 },

    #[error("header index corrupted: {0}")]
    Corruption(String),

    #[error("ledger worker failed: {0}")]
    Worker(String),

    #[error("ledger service stopped")]
    Stopped,

    #[error("ledger did not answer within {0:?}")]
    Timeout(std::time::Duration),
}
