//! Verification scripts and witnesses.
//!
//! A verification script is the encoded form of a [`Contract`]: an m-of-n
//! Ed25519 multi-signature over a sorted key list. Its [`ScriptHash`] is the
//! identity that owns coins and account balances. A [`Witness`] pairs the
//! script with the ordered signatures that satisfy it.

use serde::{Deserialize, Serialize};

use crate::encoding::{decode, encode};
use crate::{PublicKey, ScriptHash, Signature};

/// An m-of-n multi-signature verification contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub threshold: u16,
    pub keys: Vec<PublicKey>,
}

impl Contract {
    /// A single-signature contract.
    pub fn single(key: PublicKey) -> Self {
        Self { threshold: 1, keys: vec![key] }
    }

    /// A multi-signature contract; keys are sorted so that any permutation
    /// of the same set yields the same script hash.
    pub fn multi_sig(threshold: u16, keys: &[PublicKey]) -> Self {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        Self { threshold, keys }
    }

    /// The m-of-n contract a validator set signs blocks with:
    /// `m = n - (n - 1) / 3`.
    pub fn consensus(validators: &[PublicKey]) -> Self {
        let n = validators.len() as u16;
        let m = n - n.saturating_sub(1) / 3;
        Self::multi_sig(m, validators)
    }

    pub fn script(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn script_hash(&self) -> ScriptHash {
        ScriptHash::digest(&self.script())
    }

    /// Parse a verification script. Returns `None` for anything that is not
    /// a well-formed contract (zero or unsatisfiable threshold).
    pub fn from_script(script: &[u8]) -> Option<Self> {
        let contract: Contract = decode(script).ok()?;
        if contract.threshold == 0 || contract.threshold as usize > contract.keys.len() {
            return None;
        }
        Some(contract)
    }
}

/// Invocation (signatures) plus verification (contract script).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub invocation: Vec<Signature>,
    pub verification: Vec<u8>,
}

impl Witness {
    pub fn script_hash(&self) -> ScriptHash {
        ScriptHash::digest(&self.verification)
    }

    pub fn is_empty(&self) -> bool {
        self.invocation.is_empty() && self.verification.is_empty()
    }
}
