//! Ledger state records persisted through the snapshot layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AssetType, Fixed8, Hash256, PublicKey, ScriptHash, Transaction, TrimmedBlock};

/// Persisted block: trimmed form plus the running system-fee total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub system_fee_amount: i64,
    pub trimmed: TrimmedBlock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionState {
    pub block_index: u32,
    pub transaction: Transaction,
}

/// Per-script-hash balances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub script_hash: ScriptHash,
    pub is_frozen: bool,
    pub balances: BTreeMap<Hash256, Fixed8>,
}

impl AccountState {
    pub fn new(script_hash: ScriptHash) -> Self {
        Self { script_hash, ..Default::default() }
    }

    pub fn balance(&self, asset: &Hash256) -> Fixed8 {
        self.balances.get(asset).copied().unwrap_or(Fixed8::ZERO)
    }

    pub fn credit(&mut self, asset: Hash256, value: Fixed8) {
        *self.balances.entry(asset).or_insert(Fixed8::ZERO) += value;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinState {
    Unspent,
    Spent,
}

/// Spend flags for every output of one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentCoinState {
    pub items: Vec<CoinState>,
}

impl UnspentCoinState {
    pub fn with_outputs(count: usize) -> Self {
        Self { items: vec![CoinState::Unspent; count] }
    }

    pub fn is_unspent(&self, index: u16) -> bool {
        matches!(self.items.get(index as usize), Some(CoinState::Unspent))
    }

    pub fn all_spent(&self) -> bool {
        self.items.iter().all(|c| *c == CoinState::Spent)
    }
}

/// Heights at which outputs of one transaction were spent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentCoinState {
    pub transaction_hash: Hash256,
    pub transaction_height: u32,
    pub items: BTreeMap<u16, u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    pub asset_id: Hash256,
    pub asset_type: AssetType,
    pub name: String,
    pub amount: Fixed8,
    pub available: Fixed8,
    pub precision: u8,
    pub owner: PublicKey,
    pub admin: ScriptHash,
    pub issuer: ScriptHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorState {
    pub public_key: PublicKey,
    pub registered: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    pub script: Vec<u8>,
    pub name: String,
}

/// Key of a contract storage cell: owner script hash followed by raw key bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub script_hash: ScriptHash,
    pub key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub value: Vec<u8>,
}

/// A persisted chunk of the header index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderHashList {
    pub hashes: Vec<Hash256>,
}

/// Pointer to the tip of the block chain or of the header chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashIndexState {
    pub hash: Hash256,
    pub index: u32,
}
