use proptest::prelude::*;

use keel_types::encoding::{decode, encode};
use keel_types::{
    merkle_root, Fixed8, Hash256, ScriptHash, Timestamp, Transaction, TransactionKind,
    TransactionOutput,
};

proptest! {
    /// Hash256 bincode serialization roundtrip.
    #[test]
    fn hash256_bincode_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = Hash256::new(bytes);
        let decoded: Hash256 = decode(&encode(&hash)).unwrap();
        prop_assert_eq!(decoded, hash);
    }

    /// Hash256 ordering agrees with byte ordering.
    #[test]
    fn hash256_order_matches_bytes(a in prop::array::uniform32(0u8..), b in prop::array::uniform32(0u8..)) {
        prop_assert_eq!(Hash256::new(a).cmp(&Hash256::new(b)), a.cmp(&b));
    }

    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        prop_assert_eq!(Timestamp::new(a) <= Timestamp::new(b), a <= b);
    }

    /// Fixed8 checked arithmetic never panics and agrees with i64.
    #[test]
    fn fixed8_checked_add(a in any::<i64>(), b in any::<i64>()) {
        let sum = Fixed8::from_raw(a).checked_add(Fixed8::from_raw(b));
        prop_assert_eq!(sum.map(|s| s.raw()), a.checked_add(b));
    }

    /// Changing any output value changes the transaction hash.
    #[test]
    fn tx_hash_covers_output_values(a in 1i64..1_000_000, b in 1i64..1_000_000) {
        prop_assume!(a != b);
        let make = |v: i64| {
            let mut tx = Transaction::new(TransactionKind::Contract);
            tx.outputs.push(TransactionOutput {
                asset_id: Hash256::digest(b"asset"),
                value: Fixed8::from_raw(v),
                script_hash: ScriptHash::digest(b"owner"),
            });
            tx
        };
        prop_assert_ne!(make(a).hash(), make(b).hash());
    }

    /// The merkle root depends on transaction order.
    #[test]
    fn merkle_root_is_order_sensitive(seeds in prop::collection::vec(any::<u64>(), 2..16)) {
        let hashes: Vec<Hash256> = seeds.iter().map(|s| Hash256::digest(&s.to_le_bytes())).collect();
        let mut reversed = hashes.clone();
        reversed.reverse();
        prop_assume!(reversed != hashes);
        prop_assert_ne!(merkle_root(&hashes), merkle_root(&reversed));
    }
}
