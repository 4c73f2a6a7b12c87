//! Blocks and headers.

use serde::{Deserialize, Serialize};

use crate::encoding::{decode, encode};
use crate::{Hash256, ScriptHash, Timestamp, Transaction, TypeError, Witness};

/// Most transactions a single block may carry.
pub const MAX_BLOCK_TRANSACTIONS: usize = 500;

/// Block header. The witness is the validators' multi-signature and is not
/// part of the hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: Timestamp,
    pub index: u32,
    /// Primary-chosen nonce.
    pub consensus_data: u64,
    /// Script hash of the validator contract that must sign the next block.
    pub next_consensus: ScriptHash,
    pub witness: Witness,
}

impl Header {
    pub fn signable_bytes(&self) -> Vec<u8> {
        encode(&(
            self.version,
            &self.prev_hash,
            &self.merkle_root,
            &self.timestamp,
            self.index,
            self.consensus_data,
            &self.next_consensus,
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

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn prev_hash(&self) -> &Hash256 {
        &self.header.prev_hash
    }

    pub fn transaction_hashes(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    /// Recompute and store the merkle root from the transaction list.
    pub fn rebuild_merkle_root(&mut self) {
        self.header.merkle_root = merkle_root(&self.transaction_hashes());
    }

    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            header: self.header.clone(),
            hashes: self.transaction_hashes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        decode(bytes)
    }
}

/// A block as persisted: header plus the ordered transaction hashes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimmedBlock {
    pub header: Header,
    pub hashes: Vec<Hash256>,
}

impl TrimmedBlock {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// A header stored ahead of its body has no transaction hashes; every
    /// full block carries at least its miner transaction.
    pub fn is_block(&self) -> bool {
        !self.hashes.is_empty()
    }
}

impl Header {
    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            header: self.clone(),
            hashes: Vec::new(),
        }
    }
}

/// Binary merkle root over transaction hashes. An odd node at any level is
/// paired with itself; the root of an empty list is zero.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => Hash256::combine(left, right),
                [single] => Hash256::combine(single, single),
                _ => Hash256::ZERO,
            })
            .collect();
    }
    level[0]
}
