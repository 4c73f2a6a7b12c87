//! Consensus messages carried inside [`ConsensusPayload::data`].
//!
//! [`ConsensusPayload::data`]: keel_types::ConsensusPayload

use serde::{Deserialize, Serialize};

use keel_types::encoding::{decode, encode};
use keel_types::{Hash256, ScriptHash, Signature, Timestamp, TypeError};

/// Announces that the sender wants to leave its current view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeView {
    pub view: u8,
    pub new_view_number: u8,
    pub timestamp: Timestamp,
}

/// The primary's block proposal.
///
/// `tx_hashes[0]` is the miner transaction derived from `nonce`. The
/// signature covers the hash of the block the proposal describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub view: u8,
    pub timestamp: Timestamp,
    pub nonce: u64,
    pub next_consensus: ScriptHash,
    pub tx_hashes: Vec<Hash256>,
    pub signature: Signature,
}

/// A backup's agreement with the proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub view: u8,
    pub signature: Signature,
}

/// The sender's block signature, sent once it saw a quorum of preparations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub view: u8,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    ChangeView(ChangeView),
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Commit(Commit),
}

impl ConsensusMessage {
    pub fn view(&self) -> u8 {
        match self {
            Self::ChangeView(m) => m.view,
            Self::PrepareRequest(m) => m.view,
            Self::PrepareResponse(m) => m.view,
            Self::Commit(m) => m.view,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChangeView(_) => "change_view",
            Self::PrepareRequest(_) => "prepare_request",
            Self::PrepareResponse(_) => "prepare_response",
            Self::Commit(_) => "commit",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_is_read_from_every_kind() {
        let sig = Signature([7; 64]);
        let messages = [
            ConsensusMessage::ChangeView(ChangeView {
                view: 2,
                new_view_number: 3,
                timestamp: Timestamp::new(10),
            }),
            ConsensusMessage::PrepareResponse(PrepareResponse { view: 2, signature: sig }),
            ConsensusMessage::Commit(Commit { view: 2, signature: sig }),
        ];
        for message in messages {
            assert_eq!(message.view(), 2);
            assert_eq!(ConsensusMessage::from_bytes(&message.to_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = ConsensusMessage::Commit(Commit {
            view: 0,
            signature: Signature([1; 64]),
        })
        .to_bytes();
        bytes.push(0);
        assert!(ConsensusMessage::from_bytes(&bytes).is_err());
    }
}
