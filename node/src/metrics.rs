//! Prometheus metrics for the keel node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`]. Counters follow ledger
//! events as they happen; gauges are refreshed by the node's sampler from
//! the ledger, P2P and consensus actors.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

use keel_consensus::ConsensusStatus;
use keel_ledger::LedgerEvent;
use keel_network::NodeStats;

use crate::NodeError;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub blocks_persisted: IntCounter,
    /// Transactions admitted to the memory pool.
    pub transactions_accepted: IntCounter,
    /// Transactions refused for any reason except being known already.
    pub transactions_rejected: IntCounter,
    pub views_changed: IntCounter,
    pub peer_disconnects: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub height: IntGauge,
    pub header_height: IntGauge,
    pub mempool_verified: IntGauge,
    pub mempool_unverified: IntGauge,
    pub connected_peers: IntGauge,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blocks_persisted = register_int_counter_with_registry!(
            Opts::new("keel_blocks_persisted_total", "Blocks committed to the ledger"),
            registry
        )?;
        let transactions_accepted = register_int_counter_with_registry!(
            Opts::new(
                "keel_transactions_accepted_total",
                "Transactions admitted to the memory pool"
            ),
            registry
        )?;
        let transactions_rejected = register_int_counter_with_registry!(
            Opts::new(
                "keel_transactions_rejected_total",
                "Transactions refused by the ledger"
            ),
            registry
        )?;
        let views_changed = register_int_counter_with_registry!(
            Opts::new("keel_consensus_views_changed_total", "Consensus view changes"),
            registry
        )?;
        let peer_disconnects = register_int_counter_with_registry!(
            Opts::new("keel_peer_disconnects_total", "Peer sessions closed"),
            registry
        )?;

        let height = register_int_gauge_with_registry!(
            Opts::new("keel_height", "Index of the current block"),
            registry
        )?;
        let header_height = register_int_gauge_with_registry!(
            Opts::new("keel_header_height", "Index of the best known header"),
            registry
        )?;
        let mempool_verified = register_int_gauge_with_registry!(
            Opts::new("keel_mempool_verified", "Verified transactions in the pool"),
            registry
        )?;
        let mempool_unverified = register_int_gauge_with_registry!(
            Opts::new(
                "keel_mempool_unverified",
                "Pool transactions awaiting re-verification"
            ),
            registry
        )?;
        let connected_peers = register_int_gauge_with_registry!(
            Opts::new("keel_connected_peers", "Established peer sessions"),
            registry
        )?;

        Ok(Self {
            registry,
            blocks_persisted,
            transactions_accepted,
            transactions_rejected,
            views_changed,
            peer_disconnects,
            height,
            header_height,
            mempool_verified,
            mempool_unverified,
            connected_peers,
        })
    }

    pub fn observe_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::PersistCompleted { .. } => self.blocks_persisted.inc(),
            LedgerEvent::TransactionAccepted(_) => self.transactions_accepted.inc(),
            LedgerEvent::TransactionRejected { .. } => self.transactions_rejected.inc(),
            LedgerEvent::BlockAccepted(_) | LedgerEvent::HeadersExtended { .. } => {}
        }
    }

    pub fn observe_heights(&self, height: u32, header_height: u32) {
        self.height.set(i64::from(height));
        self.header_height.set(i64::from(header_height));
    }

    pub fn observe_pool(&self, verified: usize, unverified: usize) {
        self.mempool_verified.set(verified as i64);
        self.mempool_unverified.set(unverified as i64);
    }

    /// Counters are raised to the cumulative totals the actors report.
    pub fn observe_peers(&self, stats: &NodeStats) {
        self.connected_peers.set(stats.connected as i64);
        raise_to(&self.peer_disconnects, stats.disconnects);
    }

    pub fn observe_consensus(&self, status: &ConsensusStatus) {
        raise_to(&self.views_changed, status.views_changed);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| NodeError::Config(e.to_string()))
    }
}

fn raise_to(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ledger::VerifyResult;
    use keel_types::Hash256;

    #[test]
    fn ledger_events_drive_counters() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe_event(&LedgerEvent::TransactionRejected {
            hash: Hash256::digest(b"tx"),
            result: VerifyResult::Invalid,
        });
        metrics.observe_event(&LedgerEvent::HeadersExtended { header_height: 3 });
        assert_eq!(metrics.transactions_rejected.get(), 1);
        assert_eq!(metrics.blocks_persisted.get(), 0);
    }

    #[test]
    fn cumulative_totals_never_move_counters_backwards() {
        let metrics = NodeMetrics::new().unwrap();
        let mut stats = NodeStats {
            connected: 2,
            unconnected: 0,
            disconnects: 5,
        };
        metrics.observe_peers(&stats);
        stats.disconnects = 3;
        metrics.observe_peers(&stats);
        assert_eq!(metrics.peer_disconnects.get(), 5);
        assert_eq!(metrics.connected_peers.get(), 2);
    }

    #[test]
    fn encoded_text_names_keel_metrics() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe_heights(7, 9);
        let text = metrics.encode().unwrap();
        assert!(text.contains("keel_height 7"));
        assert!(text.contains("keel_header_height 9"));
    }
}
