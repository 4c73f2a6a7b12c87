//! Ledger state machine for the keel node.
//!
//! - [`verify`]: transaction, header and block validation rules
//! - [`persist`]: applying a block's effects to a snapshot
//! - [`mempool`]: the bounded, fee-ranked pool of pending transactions
//! - [`blockchain`]: the single-writer state machine tying them together
//! - [`service`]: the mailbox that drives it and broadcasts [`LedgerEvent`]s
//! - [`reader`]: lock-light queries against committed state

pub mod blockchain;
pub mod engine;
pub mod error;
pub mod event;
pub mod genesis;
pub mod mempool;
pub mod orphan;
pub mod persist;
pub mod reader;
pub mod result;
pub mod service;
pub mod validators;
pub mod verify;

pub use blockchain::{Blockchain, LedgerConfig, HEADER_CHUNK_SIZE};
pub use engine::{ApplicationExecuted, ExecutionResult, NullEngine, ScriptEngine, VmState};
pub use error::LedgerError;
pub use event::LedgerEvent;
pub use genesis::{genesis_block, governing_token_id, utility_token_id};
pub use mempool::MemoryPool;
pub use reader::{ChainState, LedgerReader};
pub use result::VerifyResult;
pub use service::{LedgerCommand, LedgerHandle, LedgerService};
pub use validators::{consensus_address, next_validators};
