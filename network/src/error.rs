use thiserror::Error;

use keel_protocol::ProtocolError;

use crate::peer_manager::PenaltyReason;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("session {0} not found")]
    SessionNotFound(u64),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("ledger error: {0}")]
    Ledger(#[from] keel_ledger::LedgerError),

    #[error("peer sent an invalid {0}")]
    InvalidInventory(&'static str),

    #[error("session idle for too long")]
    Idle,

    #[error("network service stopped")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Penalty charged to the remote address when a session ends with this
    /// error. `None` for failures that are not the peer's fault.
    pub fn penalty(&self) -> Option<PenaltyReason> {
        match self {
            NetworkError::Protocol(ProtocolError::ChecksumMismatch { .. }) => {
                Some(PenaltyReason::BadChecksum)
            }
            NetworkError::Protocol(ProtocolError::Io(_)) => None,
            NetworkError::Protocol(_) => Some(PenaltyReason::ProtocolViolation),
            NetworkError::InvalidInventory(_) => Some(PenaltyReason::InvalidInventory),
            NetworkError::Idle => Some(PenaltyReason::Timeout),
            _ => None,
        }
    }
}
