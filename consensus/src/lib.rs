//! dBFT consensus.
//!
//! One round per height among the validator set chosen by the ledger:
//! the primary proposes a block, backups answer with their signature once
//! they hold every proposed transaction, and a quorum of `M = n - f`
//! preparations leads to commits. `M` commits assemble the block witness.
//! A round that stalls moves to the next view and the next primary.
//!
//! - [`context`]: per-round state with per-validator signature slots.
//! - [`messages`]: `PrepareRequest`, `PrepareResponse`, `Commit`, `ChangeView`.
//! - [`dbft`]: the pure state machine.
//! - [`service`]: the actor wiring the core to ledger and network.

pub mod context;
pub mod dbft;
pub mod error;
pub mod messages;
pub mod service;

pub use context::{miner_transaction, ConsensusContext, RoundStart};
pub use dbft::{ChainAccess, ConsensusAction, ConsensusCore, MAX_FUTURE_SECS};
pub use error::ConsensusError;
pub use messages::{ChangeView, Commit, ConsensusMessage, PrepareRequest, PrepareResponse};
pub use service::{ConsensusService, ConsensusStatus, PAYLOAD_CHANNEL_CAPACITY};
