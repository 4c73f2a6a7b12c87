//! Validator set selection.

use std::collections::BTreeSet;

use keel_store::{Snapshot, StoreError};
use keel_types::{Contract, PublicKey, ScriptHash, Transaction, TransactionKind};

/// The validators for the block after the state in `snapshot`, with the
/// enrollments carried by `pending` applied on top.
///
/// Standby validators always take part; registered candidates fill the set
/// up to `max_validators`, in key order. The result is sorted, so a
/// validator's index is its position in the consensus contract.
pub fn next_validators(
    snapshot: &Snapshot,
    standby: &[PublicKey],
    pending: &[Transaction],
    max_validators: usize,
) -> Result<Vec<PublicKey>, StoreError> {
    let mut candidates: BTreeSet<PublicKey> = snapshot
        .validators
        .find(&[])?
        .into_iter()
        .filter(|(_, state)| state.registered)
        .map(|(key, _)| key)
        .collect();
    for tx in pending {
        if let TransactionKind::Enrollment { public_key } = &tx.kind {
            candidates.insert(*public_key);
        }
    }

    let mut set: BTreeSet<PublicKey> = standby.iter().copied().collect();
    for key in candidates {
        if set.len() >= max_validators {
            break;
        }
        set.insert(key);
    }
    Ok(set.into_iter().collect())
}

/// Script hash of the m-of-n contract for `validators`.
pub fn consensus_address(validators: &[PublicKey]) -> ScriptHash {
    Contract::consensus(validators).script_hash()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_nullables::MemoryStore;
    use keel_types::ValidatorState;
    use std::sync::Arc;

    fn key(b: u8) -> PublicKey {
        PublicKey([b; 32])
    }

    #[test]
    fn standby_plus_registered_and_pending_enrollments() {
        let mut snapshot = Snapshot::new(Arc::new(MemoryStore::new())).unwrap();
        snapshot
            .validators
            .add(key(9), ValidatorState { public_key: key(9), registered: true })
            .unwrap();
        snapshot
            .validators
            .add(key(8), ValidatorState { public_key: key(8), registered: false })
            .unwrap();
        let enroll = Transaction::new(TransactionKind::Enrollment { public_key: key(5) });

        let set = next_validators(&snapshot, &[key(3), key(1)], &[enroll], 1024).unwrap();
        assert_eq!(set, vec![key(1), key(3), key(5), key(9)]);
    }

    #[test]
    fn cap_never_drops_standby() {
        let snapshot = Snapshot::new(Arc::new(MemoryStore::new())).unwrap();
        let enroll = Transaction::new(TransactionKind::Enrollment { public_key: key(0) });
        let set = next_validators(&snapshot, &[key(4), key(2)], &[enroll], 2).unwrap();
        assert_eq!(set, vec![key(2), key(4)]);
    }
}
