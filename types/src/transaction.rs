//! UTXO transactions.
//!
//! A transaction spends prior outputs (its inputs), creates new outputs, and
//! carries a type-specific payload. Its identity is the hash over every field
//! except the witnesses, so signatures never change the hash they sign.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::encoding::{decode, encode};
use crate::{Fixed8, Hash256, ProtocolParams, PublicKey, ScriptHash, TypeError, Witness};

/// Largest accepted serialized transaction, in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;
/// Most attributes a single transaction may carry.
pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;

/// Kind of an announced inventory item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryType {
    Tx,
    Block,
    Consensus,
}

/// Reference to a prior transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinReference {
    pub prev_hash: Hash256,
    pub prev_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub asset_id: Hash256,
    pub value: Fixed8,
    pub script_hash: ScriptHash,
}

/// Free-form attribute; `usage` is an opaque tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAttribute {
    pub usage: u8,
    pub data: Vec<u8>,
}

/// Asset category for `Register` transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    GoverningToken,
    UtilityToken,
    Token,
    Share,
}

/// Type-specific payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// First transaction of every block; collects network fees.
    Miner { nonce: u32 },
    /// Mints units of a registered asset.
    Issue,
    /// Registers a new asset; its id is this transaction's hash.
    Register {
        asset_type: AssetType,
        name: String,
        amount: Fixed8,
        precision: u8,
        owner: PublicKey,
        admin: ScriptHash,
    },
    /// Plain transfer.
    Contract,
    /// Runs a script through the external execution engine.
    Invocation { script: Vec<u8>, gas: Fixed8 },
    /// Registers a validator candidate.
    Enrollment { public_key: PublicKey },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub kind: TransactionKind,
    pub attributes: Vec<TransactionAttribute>,
    pub inputs: Vec<CoinReference>,
    pub outputs: Vec<TransactionOutput>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            version: 0,
            kind,
            attributes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            witnesses: Vec::new(),
        }
    }

    /// Bytes covered by the hash and by witness signatures.
    pub fn signable_bytes(&self) -> Vec<u8> {
        encode(&(
            self.version,
            &self.kind,
            &self.attributes,
            &self.inputs,
            &self.outputs,
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

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |s| s as usize)
    }

    pub fn is_miner(&self) -> bool {
        matches!(self.kind, TransactionKind::Miner { .. })
    }

    /// Whether two inputs reference the same prior output.
    pub fn has_duplicate_inputs(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.inputs.len());
        !self.inputs.iter().all(|input| seen.insert(*input))
    }

    /// Fee burned by the transaction itself, independent of inputs.
    pub fn system_fee(&self, params: &ProtocolParams) -> Fixed8 {
        match &self.kind {
            TransactionKind::Register { .. } => params.register_fee,
            TransactionKind::Enrollment { .. } => params.enrollment_fee,
            TransactionKind::Invocation { gas, .. } => *gas,
            _ => Fixed8::ZERO,
        }
    }

    /// Sum of outputs per asset.
    pub fn output_totals(&self) -> Vec<(Hash256, Fixed8)> {
        let mut totals: Vec<(Hash256, Fixed8)> = Vec::new();
        for output in &self.outputs {
            match totals.iter_mut().find(|(asset, _)| *asset == output.asset_id) {
                Some((_, sum)) => *sum += output.value,
                None => totals.push((output.asset_id, output.value)),
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;

    fn transfer() -> Transaction {
        let mut tx = Transaction::new(TransactionKind::Contract);
        tx.inputs.push(CoinReference { prev_hash: Hash256::digest(b"prev"), prev_index: 0 });
        tx.outputs.push(TransactionOutput {
            asset_id: Hash256::digest(b"asset"),
            value: Fixed8::from_units(1),
            script_hash: ScriptHash::digest(b"owner"),
        });
        tx
    }

    #[test]
    fn hash_excludes_witnesses() {
        let tx = transfer();
        let mut signed = tx.clone();
        signed.witnesses.push(Witness {
            invocation: vec![Signature([1u8; 64])],
            verification: vec![1, 2, 3],
        });
        assert_eq!(tx.hash(), signed.hash());
        assert_ne!(tx.to_bytes(), signed.to_bytes());
    }

    #[test]
    fn hash_covers_outputs() {
        let tx = transfer();
        let mut other = tx.clone();
        other.outputs[0].value = Fixed8::from_units(2);
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn duplicate_inputs_detected() {
        let mut tx = transfer();
        assert!(!tx.has_duplicate_inputs());
        let dup = tx.inputs[0];
        tx.inputs.push(dup);
        assert!(tx.has_duplicate_inputs());
    }

    #[test]
    fn output_totals_group_by_asset() {
        let mut tx = transfer();
        let extra = tx.outputs[0].clone();
        tx.outputs.push(extra);
        let totals = tx.output_totals();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].1, Fixed8::from_units(2));
    }

    #[test]
    fn bytes_roundtrip_preserves_hash() {
        let tx = transfer();
        let back = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(back.hash(), tx.hash());
    }
}
