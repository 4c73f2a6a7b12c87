//! Whole-node tests: every actor running together over a real store and
//! real sockets.

use std::sync::Arc;
use std::time::Duration;

use keel_crypto::keypair_from_seed;
use keel_node::{KeelNode, NodeConfig, NodeError};
use keel_nullables::MemoryStore;
use keel_types::NetworkId;

const WAIT: Duration = Duration::from_secs(20);

fn validator_config(seed: u8) -> NodeConfig {
    NodeConfig {
        network: NetworkId::Dev,
        port: 0,
        min_desired_connections: 0,
        seconds_per_block: 1,
        validator_seed: Some(hex::encode([seed; 32])),
        ..NodeConfig::default()
    }
}

async fn wait_for_height(node: &KeelNode, height: u32) {
    let reader = node.ledger().reader().clone();
    tokio::time::timeout(WAIT, async {
        while reader.current_height() < height {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("height {height} never reached"));
}

#[tokio::test]
async fn single_validator_dev_chain_produces_blocks() {
    let node = KeelNode::start_with_store(validator_config(1), Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    wait_for_height(&node, 2).await;

    let reader = node.ledger().reader();
    let tip = reader.block_by_index(2).unwrap().unwrap();
    assert_eq!(tip.hash(), reader.block_hash(2).unwrap());
    assert_eq!(tip.transactions.len(), 1);
    assert!(tip.transactions[0].is_miner());
    assert_eq!(node.consensus_status().borrow().view, 0);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn missing_standby_set_is_refused_outside_dev() {
    let config = NodeConfig {
        network: NetworkId::Test,
        ..validator_config(1)
    };
    let result = KeelNode::start_with_store(config, Arc::new(MemoryStore::new())).await;
    assert!(matches!(result, Err(NodeError::Config(_))));
}

#[tokio::test]
async fn chain_survives_restart_on_lmdb() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        map_size_mb: 64,
        ..validator_config(2)
    };

    let node = KeelNode::start(config.clone()).await.unwrap();
    wait_for_height(&node, 1).await;
    let reader = node.ledger().reader().clone();
    let height = reader.current_height();
    let first = reader.block_hash(1).unwrap();
    drop(reader);
    node.stop().await.unwrap();

    let node = KeelNode::start(config).await.unwrap();
    let reader = node.ledger().reader().clone();
    assert!(reader.current_height() >= height);
    assert_eq!(reader.block_hash(1), Some(first));
    drop(reader);
    node.stop().await.unwrap();
}

#[tokio::test]
async fn watch_only_node_follows_a_validator_over_p2p() {
    let validator_key = keypair_from_seed(&[3; 32]).public;
    let validator =
        KeelNode::start_with_store(validator_config(3), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
    let port = validator.local_addr().unwrap().port();

    let watcher_config = NodeConfig {
        listen: false,
        min_desired_connections: 1,
        standby_validators: vec![validator_key.to_string()],
        validator_seed: None,
        seeds: vec![format!("127.0.0.1:{port}")],
        ..validator_config(0)
    };
    let watcher = KeelNode::start_with_store(watcher_config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    wait_for_height(&validator, 2).await;
    wait_for_height(&watcher, 2).await;
    let ours = watcher.ledger().reader().block_hash(2);
    assert_eq!(ours, validator.ledger().reader().block_hash(2));
    assert_eq!(watcher.local_node().stats().await.connected, 1);

    watcher.stop().await.unwrap();
    validator.stop().await.unwrap();
}

#[tokio::test]
async fn metrics_follow_persisted_blocks() {
    let config = NodeConfig {
        enable_metrics: true,
        ..validator_config(4)
    };
    let node = KeelNode::start_with_store(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    wait_for_height(&node, 1).await;

    tokio::time::timeout(WAIT, async {
        while node.metrics().blocks_persisted.get() == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("no persisted block was counted");
    assert!(node.metrics().encode().unwrap().contains("keel_blocks_persisted_total"));

    node.stop().await.unwrap();
}
