#![allow(dead_code)]

use std::sync::Arc;

use keel_crypto::{keypair_from_seed, sign_witness};
use keel_ledger::{
    consensus_address, genesis_block, utility_token_id, Blockchain, LedgerConfig, NullEngine,
};
use keel_nullables::MemoryStore;
use keel_types::{
    Block, CoinReference, Contract, Fixed8, Hash256, Header, KeyPair, ProtocolParams, PublicKey,
    ScriptHash, Transaction, TransactionKind, TransactionOutput, Witness,
};

pub fn validators(n: u8) -> Vec<KeyPair> {
    (1..=n).map(|i| keypair_from_seed(&[i; 32])).collect()
}

pub fn standby(keys: &[KeyPair]) -> Vec<PublicKey> {
    let mut standby: Vec<PublicKey> = keys.iter().map(|k| k.public).collect();
    standby.sort();
    standby
}

pub fn config(keys: &[KeyPair]) -> LedgerConfig {
    LedgerConfig::new(ProtocolParams::dev_defaults(), standby(keys))
}

pub fn open(store: &Arc<MemoryStore>, keys: &[KeyPair]) -> Blockchain {
    Blockchain::open(store.clone(), config(keys), Arc::new(NullEngine)).unwrap()
}

/// The genesis issue transaction, whose output 1 holds the utility supply.
pub fn genesis_issue(keys: &[KeyPair]) -> Transaction {
    genesis_block(&standby(keys)).transactions[3].clone()
}

pub fn utility(units: i64, to: ScriptHash) -> TransactionOutput {
    TransactionOutput {
        asset_id: utility_token_id(),
        value: Fixed8::from_units(units),
        script_hash: to,
    }
}

/// Spend `prev:index` (owned by the validators' multi-signature), paying
/// `amount` to `to`, `fee` to the network and the rest back as change.
pub fn transfer(
    keys: &[KeyPair],
    prev: &Transaction,
    index: u16,
    amount: i64,
    fee: i64,
    to: ScriptHash,
) -> Transaction {
    let owner = Contract::consensus(&standby(keys));
    let held = prev.outputs[index as usize].value;
    let mut tx = Transaction::new(TransactionKind::Contract);
    tx.inputs.push(CoinReference {
        prev_hash: prev.hash(),
        prev_index: index,
    });
    tx.outputs.push(utility(amount, to));
    let change = held - Fixed8::from_units(amount + fee);
    if change > Fixed8::ZERO {
        tx.outputs.push(TransactionOutput {
            asset_id: utility_token_id(),
            value: change,
            script_hash: owner.script_hash(),
        });
    }
    sign_tx(keys, &mut tx);
    tx
}

pub fn sign_tx(keys: &[KeyPair], tx: &mut Transaction) {
    let owner = Contract::consensus(&standby(keys));
    let signers: Vec<&KeyPair> = keys.iter().collect();
    tx.witnesses = vec![sign_witness(&tx.hash(), &owner, &signers)];
}

/// A block on top of `prev` holding a miner transaction followed by `txs`,
/// signed by the validators.
pub fn next_block(keys: &[KeyPair], prev: &Header, txs: Vec<Transaction>) -> Block {
    let standby = standby(keys);
    let mut transactions = vec![Transaction::new(TransactionKind::Miner {
        nonce: prev.index + 1,
    })];
    transactions.extend(txs);
    let mut block = Block {
        header: Header {
            version: 0,
            prev_hash: prev.hash(),
            merkle_root: Hash256::ZERO,
            timestamp: prev.timestamp.plus_secs(15),
            index: prev.index + 1,
            consensus_data: 42,
            next_consensus: consensus_address(&standby),
            witness: Witness::default(),
        },
        transactions,
    };
    block.rebuild_merkle_root();
    let signers: Vec<&KeyPair> = keys.iter().collect();
    block.header.witness = sign_witness(
        &block.hash(),
        &Contract::consensus(&standby),
        &signers,
    );
    block
}
