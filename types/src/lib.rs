//! Fundamental types for the keel node.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace: hashes, fixed-point amounts, keys, verification scripts,
//! transactions, blocks, the consensus payload envelope, and the ledger
//! state records persisted through the snapshot layer.

pub mod amount;
pub mod block;
pub mod consensus;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod params;
pub mod script;
pub mod state;
pub mod time;
pub mod transaction;

pub use amount::Fixed8;
pub use block::{merkle_root, Block, Header, TrimmedBlock, MAX_BLOCK_TRANSACTIONS};
pub use consensus::ConsensusPayload;
pub use error::TypeError;
pub use hash::{Hash256, ScriptHash};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use params::ProtocolParams;
pub use script::{Contract, Witness};
pub use state::{
    AccountState, AssetState, BlockState, CoinState, ContractState, HashIndexState,
    HeaderHashList, SpentCoinState, StorageItem, StorageKey, TransactionState, UnspentCoinState,
    ValidatorState,
};
pub use time::Timestamp;
pub use transaction::{
    AssetType, CoinReference, InventoryType, Transaction, TransactionAttribute, TransactionKind,
    TransactionOutput, MAX_TRANSACTION_ATTRIBUTES, MAX_TRANSACTION_SIZE,
};
