use thiserror::Error;

/// Wire-level failures. Every variant is grounds for closing the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("wrong network magic: expected {expected:#010x}, got {actual:#010x}")]
    BadMagic { expected: u32, actual: u32 },

    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("checksum mismatch on {command}")]
    ChecksumMismatch { command: String },

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("unexpected {command} during handshake")]
    UnexpectedCommand { command: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<keel_types::TypeError> for ProtocolError {
    fn from(e: keel_types::TypeError) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}
