//! m-of-n witness signing and verification.
//!
//! A witness satisfies its contract when `threshold` signatures verify
//! against the contract keys, consumed in key order: each signature must
//! match a key that comes after the key matched by the previous one.

use keel_types::{Contract, Hash256, KeyPair, Signature, Witness};

use crate::sign::{sign_hash, verify_hash};

/// Verify a witness over the hash of a transaction or block.
///
/// The caller checks separately that `witness.script_hash()` is the script
/// hash the witness is supposed to prove.
pub fn verify_witness(hash: &Hash256, witness: &Witness) -> bool {
    let Some(contract) = Contract::from_script(&witness.verification) else {
        return false;
    };
    if witness.invocation.len() != contract.threshold as usize {
        return false;
    }

    let mut keys = contract.keys.iter();
    'sigs: for signature in &witness.invocation {
        for key in keys.by_ref() {
            if verify_hash(hash, signature, key) {
                continue 'sigs;
            }
        }
        return false;
    }
    true
}

/// Build a witness for `contract` from whichever of `signers` belong to it.
///
/// Signatures are emitted in contract key order and truncated to the
/// threshold. If fewer than `threshold` signers belong to the contract the
/// witness is returned incomplete and will fail verification.
pub fn sign_witness(hash: &Hash256, contract: &Contract, signers: &[&KeyPair]) -> Witness {
    let invocation: Vec<Signature> = contract
        .keys
        .iter()
        .filter_map(|key| signers.iter().find(|kp| kp.public == *key))
        .take(contract.threshold as usize)
        .map(|kp| sign_hash(hash, &kp.private))
        .collect();
    Witness {
        invocation,
        verification: contract.script(),
    }
}

/// Assemble a witness from signatures gathered out of band, indexed by
/// position in `contract.keys`.
pub fn witness_from_signatures(contract: &Contract, signatures: &[Option<Signature>]) -> Witness {
    let invocation = signatures
        .iter()
        .flatten()
        .copied()
        .take(contract.threshold as usize)
        .collect();
    Witness {
        invocation,
        verification: contract.script(),
    }
}
