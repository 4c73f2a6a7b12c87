//! The genesis block and the two native assets it registers.
//!
//! Genesis is fully determined by the standby validator set: change the set
//! and every node computes a different genesis hash, so nodes with
//! mismatched configuration refuse to share a store.

use keel_types::{
    AssetType, Block, Contract, Fixed8, Hash256, Header, PublicKey, ScriptHash, Timestamp,
    Transaction, TransactionKind, TransactionOutput, Witness,
};

pub const GENESIS_TIMESTAMP: u64 = 1_468_595_301;
pub const GENESIS_NONCE: u64 = 2_083_236_893;

/// Total supply of the governing token. Indivisible.
pub const GOVERNING_SUPPLY: i64 = 100_000_000;
/// Total supply of the utility token, which pays every fee.
pub const UTILITY_SUPPLY: i64 = 100_000_000;

fn native_admin() -> ScriptHash {
    ScriptHash::digest(&[0x51])
}

pub fn governing_token() -> Transaction {
    Transaction::new(TransactionKind::Register {
        asset_type: AssetType::GoverningToken,
        name: "KEEL".into(),
        amount: Fixed8::from_units(GOVERNING_SUPPLY),
        precision: 0,
        owner: PublicKey([0u8; 32]),
        admin: native_admin(),
    })
}

pub fn utility_token() -> Transaction {
    Transaction::new(TransactionKind::Register {
        asset_type: AssetType::UtilityToken,
        name: "KEELGAS".into(),
        amount: Fixed8::from_units(UTILITY_SUPPLY),
        precision: 8,
        owner: PublicKey([0u8; 32]),
        admin: native_admin(),
    })
}

pub fn governing_token_id() -> Hash256 {
    governing_token().hash()
}

pub fn utility_token_id() -> Hash256 {
    utility_token().hash()
}

/// Genesis: miner, both asset registrations, and one issue that hands the
/// full supply of both assets to the standby validators' multi-signature.
pub fn genesis_block(standby_validators: &[PublicKey]) -> Block {
    let consensus = Contract::consensus(standby_validators).script_hash();

    let mut issue = Transaction::new(TransactionKind::Issue);
    issue.outputs = vec![
        TransactionOutput {
            asset_id: governing_token_id(),
            value: Fixed8::from_units(GOVERNING_SUPPLY),
            script_hash: consensus,
        },
        TransactionOutput {
            asset_id: utility_token_id(),
            value: Fixed8::from_units(UTILITY_SUPPLY),
            script_hash: consensus,
        },
    ];

    let mut block = Block {
        header: Header {
            version: 0,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: Timestamp::new(GENESIS_TIMESTAMP),
            index: 0,
            consensus_data: GENESIS_NONCE,
            next_consensus: consensus,
            witness: Witness::default(),
        },
        transactions: vec![
            Transaction::new(TransactionKind::Miner { nonce: GENESIS_NONCE as u32 }),
            governing_token(),
            utility_token(),
            issue,
        ],
    };
    block.rebuild_merkle_root();
    block
}
