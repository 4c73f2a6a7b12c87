//! Protocol parameters shared by ledger validation, the memory pool and
//! consensus.

use serde::{Deserialize, Serialize};

use crate::Fixed8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Target block interval; also the base of every consensus timer.
    pub seconds_per_block: u64,
    /// Upper bound on transactions a primary packs into a proposal.
    pub max_transactions_per_block: usize,
    /// Upper bound on the validator set size.
    pub max_validators: usize,
    /// System fee of a `Register` transaction.
    pub register_fee: Fixed8,
    /// System fee of an `Enrollment` transaction.
    pub enrollment_fee: Fixed8,
    /// Minimum network fee per byte once the free slots are used up.
    pub min_fee_rate: Fixed8,
    /// Pending transactions allowed below `min_fee_rate`.
    pub free_tx_slots: usize,
    /// Memory pool capacity (verified + unverified).
    pub mempool_capacity: usize,
    /// Unverified pool entries re-checked per reverification tick.
    pub max_reverify_per_tick: usize,
    /// How far in the future a block or proposal timestamp may be.
    pub max_future_timestamp_secs: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            seconds_per_block: 15,
            max_transactions_per_block: 500,
            max_validators: 1024,
            register_fee: Fixed8::from_units(10_000),
            enrollment_fee: Fixed8::from_units(1_000),
            min_fee_rate: Fixed8::from_raw(1_000),
            free_tx_slots: 20,
            mempool_capacity: 50_000,
            max_reverify_per_tick: 1_000,
            max_future_timestamp_secs: 600,
        }
    }
}

impl ProtocolParams {
    /// Short block time and a small pool, for local development and tests.
    pub fn dev_defaults() -> Self {
        Self {
            seconds_per_block: 1,
            mempool_capacity: 1_000,
            register_fee: Fixed8::ZERO,
            enrollment_fee: Fixed8::ZERO,
            ..Self::default()
        }
    }
}
