//! Applying a block's effects to the persisting snapshot.

use std::collections::BTreeMap;

use keel_store::{Snapshot, StoreError};
use keel_types::{
    AccountState, AssetState, Block, BlockState, CoinReference, CoinState, Fixed8,
    HashIndexState, ProtocolParams, SpentCoinState, StorageItem, TransactionKind,
    TransactionState, UnspentCoinState, ValidatorState,
};

use crate::engine::{ApplicationExecuted, ScriptEngine, StorageChange, VmState};
use crate::genesis::governing_token_id;

/// Stage every effect of `block` in `snapshot`, in transaction order, and
/// advance the block pointer.
///
/// The caller has already validated the block; a missing referenced output
/// here means the store is inconsistent and is reported as an error.
/// Invocation faults are recorded in the returned results and do not stop
/// the block.
pub fn apply_block(
    snapshot: &mut Snapshot,
    block: &Block,
    params: &ProtocolParams,
    engine: &dyn ScriptEngine,
) -> Result<Vec<ApplicationExecuted>, StoreError> {
    let hash = block.hash();
    let index = block.index();
    let governing = governing_token_id();
    snapshot.persisting_block = Some(block.clone());

    let prev_fees = if index == 0 {
        0
    } else {
        snapshot.system_fee_amount(&block.header.prev_hash)?
    };
    let block_fees: i64 = block
        .transactions
        .iter()
        .map(|tx| tx.system_fee(params).raw())
        .fold(0i64, i64::saturating_add);
    let block_state = BlockState {
        system_fee_amount: prev_fees.saturating_add(block_fees),
        trimmed: block.trim(),
    };
    // A header stored ahead of the body is replaced by the full block.
    let slot = snapshot.blocks.get_and_change_or(&hash, || block_state.clone())?;
    *slot = block_state;

    let mut executed = Vec::new();
    for tx in &block.transactions {
        let tx_hash = tx.hash();
        snapshot.transactions.add(
            tx_hash,
            TransactionState {
                block_index: index,
                transaction: tx.clone(),
            },
        )?;
        snapshot
            .unspent_coins
            .add(tx_hash, UnspentCoinState::with_outputs(tx.outputs.len()))?;

        for output in &tx.outputs {
            snapshot
                .accounts
                .get_and_change_or(&output.script_hash, || AccountState::new(output.script_hash))?
                .credit(output.asset_id, output.value);
        }

        let mut by_prev: BTreeMap<_, Vec<&CoinReference>> = BTreeMap::new();
        for input in &tx.inputs {
            by_prev.entry(input.prev_hash).or_default().push(input);
        }
        for (prev_hash, inputs) in by_prev {
            let prev = snapshot.transactions.get(&prev_hash)?;
            for input in inputs {
                let slot = input.prev_index as usize;
                let Some(output) = prev.transaction.outputs.get(slot).cloned() else {
                    return Err(StoreError::Corruption(format!(
                        "input {prev_hash}:{} references a missing output",
                        input.prev_index
                    )));
                };

                let coins = snapshot.unspent_coins.get_and_change(&prev_hash)?;
                match coins.items.get_mut(slot) {
                    Some(state) => *state = CoinState::Spent,
                    None => {
                        return Err(StoreError::Corruption(format!(
                            "coin state of {prev_hash} has no slot {slot}"
                        )))
                    }
                }
                if coins.all_spent() {
                    snapshot.unspent_coins.delete(&prev_hash)?;
                }

                if output.asset_id == governing {
                    snapshot
                        .spent_coins
                        .get_and_change_or(&prev_hash, || SpentCoinState {
                            transaction_hash: prev_hash,
                            transaction_height: prev.block_index,
                            items: BTreeMap::new(),
                        })?
                        .items
                        .insert(input.prev_index, index);
                }

                snapshot
                    .accounts
                    .get_and_change(&output.script_hash)?
                    .credit(output.asset_id, -output.value);
            }
        }

        match &tx.kind {
            TransactionKind::Register {
                asset_type,
                name,
                amount,
                precision,
                owner,
                admin,
            } => {
                snapshot.assets.add(
                    tx_hash,
                    AssetState {
                        asset_id: tx_hash,
                        asset_type: *asset_type,
                        name: name.clone(),
                        amount: *amount,
                        available: Fixed8::ZERO,
                        precision: *precision,
                        owner: *owner,
                        admin: *admin,
                        issuer: *admin,
                    },
                )?;
            }
            TransactionKind::Issue => {
                let mut minted: BTreeMap<_, Fixed8> = BTreeMap::new();
                for output in &tx.outputs {
                    *minted.entry(output.asset_id).or_default() += output.value;
                }
                for input in &tx.inputs {
                    let prev = snapshot.transactions.get(&input.prev_hash)?;
                    if let Some(output) = prev.transaction.outputs.get(input.prev_index as usize) {
                        *minted.entry(output.asset_id).or_default() -= output.value;
                    }
                }
                for (asset_id, amount) in minted.into_iter().filter(|(_, a)| *a > Fixed8::ZERO) {
                    snapshot.assets.get_and_change(&asset_id)?.available += amount;
                }
            }
            TransactionKind::Enrollment { public_key } => {
                snapshot
                    .validators
                    .get_and_change_or(public_key, || ValidatorState {
                        public_key: *public_key,
                        registered: false,
                    })?
                    .registered = true;
            }
            TransactionKind::Invocation { script, gas } => {
                let result = engine.execute(tx, script, *gas, snapshot);
                if result.vm_state == VmState::Halt {
                    for change in &result.storage_changes {
                        match change {
                            StorageChange::Put { key, value } => {
                                snapshot
                                    .storages
                                    .get_and_change_or(key, || StorageItem { value: Vec::new() })?
                                    .value = value.clone();
                            }
                            StorageChange::Delete { key } => snapshot.storages.delete(key)?,
                        }
                    }
                } else {
                    tracing::debug!(tx = %tx_hash, block = index, "invocation faulted");
                }
                executed.push(ApplicationExecuted {
                    transaction: tx_hash,
                    result,
                });
            }
            TransactionKind::Miner { .. } | TransactionKind::Contract => {}
        }
    }

    snapshot.block_hash_index.put(HashIndexState { hash, index });
    Ok(executed)
}
