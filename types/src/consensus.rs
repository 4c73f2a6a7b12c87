//! Signed envelope that carries consensus messages over the P2P layer.

use serde::{Deserialize, Serialize};

use crate::encoding::{decode, encode};
use crate::{Hash256, Signature, Timestamp, TypeError};

/// A consensus message signed by the validator at `validator_index`.
///
/// `data` is the encoded consensus message; this crate treats it as opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPayload {
    pub version: u32,
    pub prev_hash: Hash256,
    pub block_index: u32,
    pub validator_index: u16,
    pub timestamp: Timestamp,
    pub data: Vec<u8>,
    pub signature: Signature,
}

impl ConsensusPayload {
    pub fn signable_bytes(&self) -> Vec<u8> {
        encode(&(
            self.version,
            &self.prev_hash,
            self.block_index,
            self.validator_index,
            &self.timestamp,
            &self.data,
        ))
    }

    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.signable_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        decode(bytes)
    }
}
