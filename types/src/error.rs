//! Errors raised while decoding or parsing fundamental types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl From<hex::FromHexError> for TypeError {
    fn from(e: hex::FromHexError) -> Self {
        TypeError::InvalidHex(e.to_string())
    }
}

impl From<bincode::Error> for TypeError {
    fn from(e: bincode::Error) -> Self {
        TypeError::Decode(e.to_string())
    }
}
