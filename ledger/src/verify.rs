//! Validation rules for transactions, headers and blocks.
//!
//! Syntactic checks are pure functions of the item. Everything else reads a
//! [`Snapshot`] of the chain the item is meant to extend. Storage read
//! failures during validation surface as [`VerifyResult::UnableToVerify`];
//! only commit failures are fatal.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rayon::prelude::*;

use keel_crypto::verify_witness;
use keel_store::{Snapshot, StoreError};
use keel_types::{
    AssetType, Block, CoinReference, Contract, Fixed8, Hash256, Header, ProtocolParams, ScriptHash,
    Transaction, TransactionKind, TransactionOutput, Witness, MAX_BLOCK_TRANSACTIONS,
    MAX_TRANSACTION_ATTRIBUTES, MAX_TRANSACTION_SIZE,
};

use crate::genesis::utility_token_id;
use crate::VerifyResult;

/// Attribute usage whose data is an extra script hash that must witness the
/// transaction.
pub const SCRIPT_ATTRIBUTE: u8 = 0x20;

/// Structural rules that need no chain state.
pub fn check_syntax(tx: &Transaction) -> bool {
    if tx.size() > MAX_TRANSACTION_SIZE {
        return false;
    }
    if tx.attributes.len() > MAX_TRANSACTION_ATTRIBUTES {
        return false;
    }
    if tx.has_duplicate_inputs() {
        return false;
    }
    if tx.outputs.iter().any(|o| o.value <= Fixed8::ZERO) {
        return false;
    }
    if tx.is_miner() && !tx.inputs.is_empty() {
        return false;
    }
    if let TransactionKind::Invocation { gas, .. } = &tx.kind {
        if gas.is_negative() {
            return false;
        }
    }
    true
}

/// Per-asset `inputs - outputs`. Positive amounts are destroyed, negative
/// amounts are issued. `None` on overflow.
pub fn transaction_results(
    tx: &Transaction,
    references: &[TransactionOutput],
) -> Option<BTreeMap<Hash256, Fixed8>> {
    let mut results: BTreeMap<Hash256, Fixed8> = BTreeMap::new();
    for input in references {
        let entry = results.entry(input.asset_id).or_insert(Fixed8::ZERO);
        *entry = entry.checked_add(input.value)?;
    }
    for output in &tx.outputs {
        let entry = results.entry(output.asset_id).or_insert(Fixed8::ZERO);
        *entry = entry.checked_sub(output.value)?;
    }
    results.retain(|_, amount| !amount.is_zero());
    Some(results)
}

/// Network fee: destroyed utility token minus the system fee.
pub fn network_fee(tx: &Transaction, references: &[TransactionOutput], params: &ProtocolParams) -> Fixed8 {
    if tx.is_miner() {
        return Fixed8::ZERO;
    }
    let utility = utility_token_id();
    let destroyed = transaction_results(tx, references)
        .and_then(|r| r.get(&utility).copied())
        .unwrap_or(Fixed8::ZERO);
    destroyed
        .checked_sub(tx.system_fee(params))
        .unwrap_or(Fixed8::ZERO)
        .max(Fixed8::ZERO)
}

/// The outputs referenced by `tx`'s inputs, or `None` if any is missing or
/// already spent.
pub fn references(tx: &Transaction, snapshot: &Snapshot) -> Result<Option<Vec<TransactionOutput>>, StoreError> {
    let mut outputs = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        match snapshot.get_unspent(&input.prev_hash, input.prev_index)? {
            Some(output) => outputs.push(output),
            None => return Ok(None),
        }
    }
    Ok(Some(outputs))
}

/// Script hashes that must witness `tx`, sorted ascending. `None` if an
/// issued asset is unknown.
pub fn script_hashes_for_verifying(
    tx: &Transaction,
    references: &[TransactionOutput],
    snapshot: &Snapshot,
) -> Result<Option<Vec<ScriptHash>>, StoreError> {
    let mut hashes: BTreeSet<ScriptHash> = references.iter().map(|o| o.script_hash).collect();
    for attribute in tx.attributes.iter().filter(|a| a.usage == SCRIPT_ATTRIBUTE) {
        match ScriptHash::from_slice(&attribute.data) {
            Ok(hash) => {
                hashes.insert(hash);
            }
            Err(_) => return Ok(None),
        }
    }
    match &tx.kind {
        TransactionKind::Issue => {
            let Some(results) = transaction_results(tx, references) else {
                return Ok(None);
            };
            for (asset_id, _) in results.iter().filter(|(_, amount)| amount.is_negative()) {
                match snapshot.assets.try_get(asset_id)? {
                    Some(asset) => {
                        hashes.insert(asset.issuer);
                    }
                    None => return Ok(None),
                }
            }
        }
        TransactionKind::Register { owner, .. } => {
            hashes.insert(Contract::single(*owner).script_hash());
        }
        TransactionKind::Enrollment { public_key } => {
            hashes.insert(Contract::single(*public_key).script_hash());
        }
        _ => {}
    }
    Ok(Some(hashes.into_iter().collect()))
}

/// One witness per required script hash, in the same order, each valid
/// over `signed`.
pub fn verify_witnesses(signed: &Hash256, hashes: &[ScriptHash], witnesses: &[Witness]) -> bool {
    if hashes.len() != witnesses.len() {
        return false;
    }
    hashes
        .iter()
        .zip(witnesses)
        .all(|(hash, witness)| witness.script_hash() == *hash && verify_witness(signed, witness))
}

/// Rules on asset amounts shared by pooled and in-block transactions.
fn check_amounts(
    tx: &Transaction,
    references: &[TransactionOutput],
    snapshot: &Snapshot,
    params: &ProtocolParams,
) -> Result<bool, StoreError> {
    for output in &tx.outputs {
        let Some(asset) = snapshot.assets.try_get(&output.asset_id)? else {
            return Ok(false);
        };
        if !output.value.fits_precision(asset.precision) {
            return Ok(false);
        }
    }

    let Some(results) = transaction_results(tx, references) else {
        return Ok(false);
    };
    let utility = utility_token_id();

    let destroyed: Vec<_> = results.iter().filter(|(_, a)| **a > Fixed8::ZERO).collect();
    if destroyed.len() > 1 {
        return Ok(false);
    }
    if let Some((asset, _)) = destroyed.first() {
        if **asset != utility {
            return Ok(false);
        }
    }
    let system_fee = tx.system_fee(params);
    if system_fee > Fixed8::ZERO {
        match destroyed.first() {
            Some((_, amount)) if **amount >= system_fee => {}
            _ => return Ok(false),
        }
    }

    let issued: Vec<_> = results.iter().filter(|(_, a)| a.is_negative()).collect();
    match &tx.kind {
        TransactionKind::Miner { .. } => {
            if issued.iter().any(|(asset, _)| **asset != utility) {
                return Ok(false);
            }
        }
        TransactionKind::Issue => {
            for (asset_id, amount) in issued {
                if *asset_id == utility {
                    return Ok(false);
                }
                let Some(asset) = snapshot.assets.try_get(asset_id)? else {
                    return Ok(false);
                };
                let after = asset.available.checked_sub(*amount);
                if !after.is_some_and(|a| a <= asset.amount) {
                    return Ok(false);
                }
            }
        }
        _ => {
            if !issued.is_empty() {
                return Ok(false);
            }
        }
    }

    if let TransactionKind::Register { asset_type, amount, precision, .. } = &tx.kind {
        if matches!(asset_type, AssetType::GoverningToken | AssetType::UtilityToken) {
            return Ok(false);
        }
        if *amount <= Fixed8::ZERO || *precision > 8 || !amount.fits_precision(*precision) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Full validation of a loose transaction against `snapshot`.
///
/// `conflicts` reports whether an input is already claimed by another
/// pooled transaction. Returns the network fee on success.
pub fn verify_transaction(
    tx: &Transaction,
    snapshot: &Snapshot,
    params: &ProtocolParams,
    conflicts: impl Fn(&CoinReference) -> bool,
) -> Result<Fixed8, VerifyResult> {
    match check_transaction(tx, snapshot, params, conflicts) {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(hash = %tx.hash(), error = %e, "state read failed during verification");
            Err(VerifyResult::UnableToVerify)
        }
    }
}

fn check_transaction(
    tx: &Transaction,
    snapshot: &Snapshot,
    params: &ProtocolParams,
    conflicts: impl Fn(&CoinReference) -> bool,
) -> Result<Result<Fixed8, VerifyResult>, StoreError> {
    if tx.is_miner() || !check_syntax(tx) {
        return Ok(Err(VerifyResult::Invalid));
    }
    if tx.inputs.iter().any(&conflicts) {
        return Ok(Err(VerifyResult::Invalid));
    }
    let Some(refs) = references(tx, snapshot)? else {
        return Ok(Err(VerifyResult::Invalid));
    };
    if !check_amounts(tx, &refs, snapshot, params)? {
        return Ok(Err(VerifyResult::Invalid));
    }
    let Some(hashes) = script_hashes_for_verifying(tx, &refs, snapshot)? else {
        return Ok(Err(VerifyResult::Invalid));
    };
    if !verify_witnesses(&tx.hash(), &hashes, &tx.witnesses) {
        return Ok(Err(VerifyResult::Invalid));
    }
    Ok(Ok(network_fee(tx, &refs, params)))
}

/// Header rules: links to a stored header, strictly later timestamp, and a
/// witness from the validator contract named by the parent.
pub fn verify_header(header: &Header, snapshot: &Snapshot) -> Result<bool, StoreError> {
    let Some(prev) = snapshot.get_header(&header.prev_hash)? else {
        return Ok(false);
    };
    if prev.index.checked_add(1) != Some(header.index) {
        return Ok(false);
    }
    if prev.timestamp >= header.timestamp {
        return Ok(false);
    }
    Ok(header.witness.script_hash() == prev.next_consensus
        && verify_witness(&header.hash(), &header.witness))
}

/// Block shape: a leading miner transaction and no other, bounded size, no
/// repeated transactions, and a merkle root matching the body.
pub fn check_block_structure(block: &Block) -> bool {
    let txs = &block.transactions;
    if txs.is_empty() || txs.len() > MAX_BLOCK_TRANSACTIONS {
        return false;
    }
    if !txs[0].is_miner() || txs[1..].iter().any(Transaction::is_miner) {
        return false;
    }
    let hashes = block.transaction_hashes();
    let unique: HashSet<_> = hashes.iter().collect();
    if unique.len() != hashes.len() {
        return false;
    }
    keel_types::merkle_root(&hashes) == block.header.merkle_root
}

/// Validate every transaction of `block` against the state it extends.
///
/// Inputs may spend outputs of earlier transactions in the same block but
/// never the same output twice. The miner transaction may only mint the
/// utility token, and no more than the block's network fees. Witnesses are
/// checked in parallel once every reference is resolved.
pub fn verify_block_transactions(
    block: &Block,
    snapshot: &Snapshot,
    params: &ProtocolParams,
) -> Result<bool, StoreError> {
    let mut in_block: HashMap<Hash256, &Transaction> = HashMap::new();
    let mut spent: HashSet<CoinReference> = HashSet::new();
    let mut jobs: Vec<(Hash256, Vec<ScriptHash>, &[Witness])> = Vec::new();
    let mut fees = Fixed8::ZERO;

    for tx in &block.transactions {
        let hash = tx.hash();
        if !check_syntax(tx) {
            return Ok(false);
        }
        if snapshot.contains_transaction(&hash)? {
            return Ok(false);
        }

        let mut refs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if !spent.insert(*input) {
                return Ok(false);
            }
            let output = match in_block.get(&input.prev_hash) {
                Some(prev) => prev.outputs.get(input.prev_index as usize).cloned(),
                None => snapshot.get_unspent(&input.prev_hash, input.prev_index)?,
            };
            match output {
                Some(output) => refs.push(output),
                None => return Ok(false),
            }
        }

        if !tx.is_miner() {
            if !check_amounts(tx, &refs, snapshot, params)? {
                return Ok(false);
            }
            let Some(hashes) = script_hashes_for_verifying(tx, &refs, snapshot)? else {
                return Ok(false);
            };
            jobs.push((hash, hashes, tx.witnesses.as_slice()));
            let Some(total) = fees.checked_add(network_fee(tx, &refs, params)) else {
                return Ok(false);
            };
            fees = total;
        }
        in_block.insert(hash, tx);
    }

    let miner = &block.transactions[0];
    let Some(minted) = miner
        .outputs
        .iter()
        .try_fold(Fixed8::ZERO, |sum, o| sum.checked_add(o.value))
    else {
        return Ok(false);
    };
    let utility = utility_token_id();
    if miner.outputs.iter().any(|o| o.asset_id != utility) || minted > fees {
        return Ok(false);
    }

    Ok(jobs
        .par_iter()
        .all(|(hash, hashes, witnesses)| verify_witnesses(hash, hashes, witnesses)))
}
