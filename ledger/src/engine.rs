//! Boundary to the external script execution engine.
//!
//! The ledger hands every `Invocation` transaction to a [`ScriptEngine`]
//! together with a read view of the persisting state. The engine reports
//! its final state and the storage writes it wants; the ledger applies those
//! writes only when execution halted normally. A faulted invocation is still
//! part of the block: its coins move, its storage changes do not.

use keel_store::Snapshot;
use keel_types::{Fixed8, Hash256, ScriptHash, StorageKey, Transaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmState {
    Halt,
    Fault,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub script_hash: ScriptHash,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageChange {
    Put { key: StorageKey, value: Vec<u8> },
    Delete { key: StorageKey },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub vm_state: VmState,
    pub gas_consumed: Fixed8,
    pub notifications: Vec<Notification>,
    pub storage_changes: Vec<StorageChange>,
}

impl ExecutionResult {
    pub fn halt() -> Self {
        Self {
            vm_state: VmState::Halt,
            gas_consumed: Fixed8::ZERO,
            notifications: Vec::new(),
            storage_changes: Vec::new(),
        }
    }

    pub fn fault(gas_consumed: Fixed8) -> Self {
        Self {
            vm_state: VmState::Fault,
            gas_consumed,
            notifications: Vec::new(),
            storage_changes: Vec::new(),
        }
    }
}

/// Execution record of one invocation inside a persisted block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationExecuted {
    pub transaction: Hash256,
    pub result: ExecutionResult,
}

pub trait ScriptEngine: Send + Sync {
    /// Run `script` on behalf of `tx` with at most `gas` to spend.
    ///
    /// `snapshot` reflects every transaction of the block applied before
    /// `tx`. The engine must not mutate it.
    fn execute(&self, tx: &Transaction, script: &[u8], gas: Fixed8, snapshot: &Snapshot) -> ExecutionResult;
}

/// Engine that halts every script without effects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEngine;

impl ScriptEngine for NullEngine {
    fn execute(&self, _tx: &Transaction, _script: &[u8], _gas: Fixed8, _snapshot: &Snapshot) -> ExecutionResult {
        ExecutionResult::halt()
    }
}
