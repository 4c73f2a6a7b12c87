//! Several validators exchanging payloads in memory.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use keel_consensus::{ChainAccess, ConsensusAction, ConsensusCore, ConsensusMessage, RoundStart};
use keel_crypto::{keypair_from_seed, verify_witness};
use keel_ledger::{Blockchain, LedgerConfig, NullEngine, VerifyResult};
use keel_nullables::MemoryStore;
use keel_store::StoreError;
use keel_types::{
    Block, ConsensusPayload, Contract, Hash256, KeyPair, ProtocolParams, PublicKey, ScriptHash,
    Timestamp, Transaction,
};

const SECONDS_PER_BLOCK: u64 = 15;

struct FixedChain(ScriptHash);

impl ChainAccess for FixedChain {
    fn next_consensus(&self, _: &[Transaction]) -> Result<ScriptHash, StoreError> {
        Ok(self.0)
    }

    fn is_on_chain(&self, _: &Hash256) -> Result<bool, StoreError> {
        Ok(false)
    }
}

fn keys(n: u8) -> Vec<KeyPair> {
    let mut keys: Vec<KeyPair> = (1..=n).map(|i| keypair_from_seed(&[i; 32])).collect();
    keys.sort_by(|a, b| a.public.cmp(&b.public));
    keys
}

fn publics(keys: &[KeyPair]) -> Vec<PublicKey> {
    keys.iter().map(|k| k.public).collect()
}

/// Validators wired to each other through an in-memory queue.
struct Net {
    nodes: Vec<ConsensusCore>,
    muted: HashSet<usize>,
    queue: VecDeque<(usize, ConsensusPayload)>,
    blocks: Vec<Option<Block>>,
    /// Drop every commit instead of delivering it.
    lose_commits: bool,
    now: Timestamp,
}

impl Net {
    fn new(keys: Vec<KeyPair>, chain: Arc<dyn ChainAccess>, start: RoundStart, now: Timestamp) -> Self {
        let mut nodes: Vec<ConsensusCore> = keys
            .into_iter()
            .map(|key| ConsensusCore::new(Some(key), chain.clone(), SECONDS_PER_BLOCK))
            .collect();
        for node in &mut nodes {
            node.start_round(start.clone(), now);
        }
        let n = nodes.len();
        Self {
            nodes,
            muted: HashSet::new(),
            queue: VecDeque::new(),
            blocks: vec![None; n],
            lose_commits: false,
            now,
        }
    }

    fn standalone(n: u8) -> Self {
        let keys = keys(n);
        let validators = publics(&keys);
        let chain = Arc::new(FixedChain(Contract::consensus(&validators).script_hash()));
        let start = RoundStart {
            block_index: 1,
            prev_hash: Hash256::digest(b"genesis"),
            prev_timestamp: Timestamp::new(1_000),
            validators,
        };
        Self::new(keys, chain, start, Timestamp::new(1_100))
    }

    fn primary(&self, view: u8) -> usize {
        self.nodes[0].context().primary_index(view)
    }

    fn apply(&mut self, from: usize, actions: Vec<ConsensusAction>) {
        for action in actions {
            match action {
                ConsensusAction::Broadcast(payload) if !self.muted.contains(&from) => {
                    if self.lose_commits && is_commit(&payload) {
                        continue;
                    }
                    self.queue.push_back((from, payload))
                }
                ConsensusAction::SubmitBlock(block) => self.blocks[from] = Some(block),
                _ => {}
            }
        }
    }

    fn fire_timer(&mut self, index: usize) {
        let actions = self.nodes[index].on_timer(self.now, Vec::new());
        self.apply(index, actions);
    }

    fn deliver_all(&mut self) {
        while let Some((from, payload)) = self.queue.pop_front() {
            for to in 0..self.nodes.len() {
                if to == from {
                    continue;
                }
                let actions = self.nodes[to].on_payload(payload.clone(), self.now);
                self.apply(to, actions);
            }
        }
    }

    fn agreed(&self) -> Vec<&Block> {
        self.blocks.iter().flatten().collect()
    }
}

fn is_commit(payload: &ConsensusPayload) -> bool {
    matches!(
        ConsensusMessage::from_bytes(&payload.data),
        Ok(ConsensusMessage::Commit(_))
    )
}

fn assert_single_block(blocks: &[&Block], validators: &[PublicKey]) {
    let first = blocks[0].hash();
    assert!(blocks.iter().all(|b| b.hash() == first), "validators agreed on different blocks");
    let witness = &blocks[0].header.witness;
    assert_eq!(witness.script_hash(), Contract::consensus(validators).script_hash());
    assert!(verify_witness(&first, witness));
}

#[test]
fn four_validators_commit_one_block_at_view_zero() {
    let mut net = Net::standalone(4);
    let primary = net.primary(0);
    net.fire_timer(primary);
    net.deliver_all();

    let blocks = net.agreed();
    assert_eq!(blocks.len(), 4);
    assert_single_block(&blocks, net.nodes[0].context().validators());
    assert!(net.nodes.iter().all(|n| n.context().view() == 0));
}

#[test]
fn one_silent_validator_is_tolerated() {
    let mut net = Net::standalone(4);
    let primary = net.primary(0);
    let silent = (primary + 1) % 4;
    net.muted.insert(silent);
    net.fire_timer(primary);
    net.deliver_all();

    // The silent node still hears everyone and assembles the block.
    let blocks = net.agreed();
    assert_eq!(blocks.len(), 4);
    assert_single_block(&blocks, net.nodes[0].context().validators());
}

#[test]
fn two_silent_validators_stall_the_round() {
    let mut net = Net::standalone(4);
    let primary = net.primary(0);
    net.muted.insert((primary + 1) % 4);
    net.muted.insert((primary + 2) % 4);
    net.fire_timer(primary);
    net.deliver_all();
    assert!(net.agreed().is_empty());
}

#[test]
fn preparation_quorum_before_view_change_quorum_commits_at_view_zero() {
    let mut net = Net::standalone(4);
    let primary = net.primary(0);
    let impatient = (primary + 3) % 4;

    // One backup's timer runs out before the proposal arrives.
    net.fire_timer(impatient);
    net.deliver_all();
    assert!(net.nodes[impatient].context().view_changing());

    net.fire_timer(primary);
    net.deliver_all();

    let blocks = net.agreed();
    assert_eq!(blocks.len(), 4);
    assert_single_block(&blocks, net.nodes[0].context().validators());
    assert!(net.nodes.iter().all(|n| n.context().view() == 0));
}

#[test]
fn view_change_quorum_moves_the_round_to_the_next_primary() {
    let mut net = Net::standalone(4);
    let old_primary = net.primary(0);
    net.muted.insert(old_primary);

    for index in 0..4 {
        if index != old_primary {
            net.fire_timer(index);
        }
    }
    net.deliver_all();
    assert!(net.nodes.iter().all(|n| n.context().view() == 1));
    assert!(net.agreed().is_empty());

    let new_primary = net.primary(1);
    assert_ne!(new_primary, old_primary);
    assert!(net.nodes[new_primary].context().is_primary());
    net.fire_timer(new_primary);
    net.deliver_all();

    let blocks = net.agreed();
    assert_eq!(blocks.len(), 4);
    assert_single_block(&blocks, net.nodes[0].context().validators());
}

#[test]
fn lost_commits_are_repeated_instead_of_changing_view() {
    let mut net = Net::standalone(4);
    let primary = net.primary(0);
    net.lose_commits = true;
    net.fire_timer(primary);
    net.deliver_all();

    // Everyone prepared and committed, but no commit arrived anywhere.
    assert!(net.agreed().is_empty());
    assert!(net.nodes.iter().all(|n| n.context().commit_sent()));

    net.lose_commits = false;
    for index in 0..4 {
        net.fire_timer(index);
    }
    let repeated: Vec<ConsensusMessage> = net
        .queue
        .iter()
        .map(|(_, p)| ConsensusMessage::from_bytes(&p.data).unwrap())
        .collect();
    assert_eq!(repeated.len(), 4);
    assert!(repeated.iter().all(|m| matches!(m, ConsensusMessage::Commit(c) if c.view == 0)));

    net.deliver_all();
    let blocks = net.agreed();
    assert_eq!(blocks.len(), 4);
    assert_single_block(&blocks, net.nodes[0].context().validators());
}

#[test]
fn agreed_block_is_accepted_by_the_ledger() {
    let keys = keys(4);
    let validators = publics(&keys);
    let store = Arc::new(MemoryStore::new());
    let config = LedgerConfig::new(ProtocolParams::dev_defaults(), validators.clone());
    let mut chain = Blockchain::open(store, config, Arc::new(NullEngine)).unwrap();
    let reader = chain.reader();

    let prev_hash = reader.current_block_hash();
    let prev = reader.header(&prev_hash).unwrap().unwrap();
    let start = RoundStart {
        block_index: prev.index + 1,
        prev_hash,
        prev_timestamp: prev.timestamp,
        validators: reader.next_validators().unwrap(),
    };
    let now = Timestamp::now().max(prev.timestamp.plus_secs(SECONDS_PER_BLOCK));
    let mut net = Net::new(keys, Arc::new(reader.clone()), start, now);
    let primary = net.primary(0);
    net.fire_timer(primary);
    net.deliver_all();

    let block = net.blocks[primary].clone().expect("primary assembled the block");
    assert_eq!(chain.on_new_block(block.clone()).unwrap(), VerifyResult::Succeed);
    assert_eq!(chain.height(), 1);
    assert_eq!(reader.current_block_hash(), block.hash());
    // The same block from another validator is already known.
    let again = net.blocks[(primary + 1) % 4].clone().unwrap();
    assert_eq!(chain.on_new_block(again).unwrap(), VerifyResult::AlreadyExists);
}
