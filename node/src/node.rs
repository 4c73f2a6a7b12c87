//! The keel node: opens the ledger and spawns every actor under one
//! shutdown controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use keel_consensus::{ConsensusService, ConsensusStatus, PAYLOAD_CHANNEL_CAPACITY};
use keel_ledger::{Blockchain, LedgerConfig, LedgerEvent, LedgerHandle, LedgerService, NullEngine};
use keel_network::{LocalNode, LocalNodeConfig, LocalNodeHandle, TaskManagerService};
use keel_store::Store;
use keel_store_lmdb::LmdbStore;

use crate::{NodeConfig, NodeError, NodeMetrics, ShutdownController};

/// How long [`KeelNode::stop`] waits for actors to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

pub struct KeelNode {
    config: NodeConfig,
    shutdown: ShutdownController,
    ledger: LedgerHandle,
    local_node: LocalNodeHandle,
    consensus_status: watch::Receiver<ConsensusStatus>,
    metrics: Arc<NodeMetrics>,
    local_addr: Option<SocketAddr>,
    task_handles: Vec<JoinHandle<()>>,
}

impl KeelNode {
    /// Open the LMDB store under `config.data_dir` and start the node.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = LmdbStore::open(&config.data_dir, config.map_size())?;
        tracing::info!(path = %config.data_dir.display(), "LMDB store opened");
        Self::start_with_store(config, Arc::new(store)).await
    }

    /// Start the node over an already opened store.
    pub async fn start_with_store(
        config: NodeConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, NodeError> {
        let key = config.validator_key()?;
        let standby = config.standby_keys(key.as_ref().map(|k| &k.public))?;
        let params = config.protocol_params();
        let seconds_per_block = params.seconds_per_block;
        let chain = Blockchain::open(
            store,
            LedgerConfig::new(params, standby),
            Arc::new(NullEngine),
        )?;
        tracing::info!(
            network = config.network.as_str(),
            height = chain.height(),
            header_height = chain.header_height(),
            validator = key.is_some(),
            "ledger opened"
        );

        let shutdown = ShutdownController::new();
        let metrics = Arc::new(NodeMetrics::new()?);
        let mut task_handles = Vec::new();

        let (ledger_service, ledger) = LedgerService::new(chain, shutdown.subscribe());
        // Subscribed before any actor runs so no block event is missed.
        let metric_events = ledger.subscribe();
        let fatal = shutdown.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = ledger_service.run().await {
                tracing::error!(error = %e, "ledger stopped on a fatal error");
                fatal.shutdown();
            }
        }));

        let (task_service, tasks) = TaskManagerService::new(
            ledger.reader().clone(),
            ledger.subscribe(),
            shutdown.subscribe(),
        );

        let listener = if config.listen {
            Some(TcpListener::bind(("0.0.0.0", config.port)).await?)
        } else {
            None
        };
        let local_addr = listener.as_ref().map(TcpListener::local_addr).transpose()?;

        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_CHANNEL_CAPACITY);
        let node_config = LocalNodeConfig {
            magic: config.magic(),
            listen_port: local_addr.map_or(0, |a| a.port()),
            seeds: resolve_seeds(&config.seeds).await,
            limits: config.peer_limits(),
            user_agent: format!("/keel:{}/", env!("CARGO_PKG_VERSION")),
            relay: true,
        };
        let (local_node, node_handle) = LocalNode::new(
            node_config,
            ledger.clone(),
            tasks.clone(),
            Some(payload_tx),
            shutdown.subscribe(),
        );
        task_handles.push(tokio::spawn(task_service.run(node_handle.clone())));
        task_handles.push(tokio::spawn(local_node.run(listener)));

        let (consensus, consensus_status) = ConsensusService::new(
            key,
            seconds_per_block,
            ledger.clone(),
            node_handle.clone(),
            tasks,
            payload_rx,
            shutdown.subscribe(),
        );
        let fatal = shutdown.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = consensus.run().await {
                tracing::error!(error = %e, "consensus stopped on a fatal error");
                fatal.shutdown();
            }
        }));

        if config.enable_metrics {
            let sampler = MetricsSampler {
                metrics: metrics.clone(),
                ledger: ledger.clone(),
                node: node_handle.clone(),
                consensus: consensus_status.clone(),
                events: metric_events,
                shutdown_rx: shutdown.subscribe(),
            };
            task_handles.push(tokio::spawn(sampler.run()));
        }

        tracing::info!(
            listen = ?local_addr,
            magic = format_args!("{:#010x}", config.magic()),
            "keel node started"
        );
        Ok(Self {
            config,
            shutdown,
            ledger,
            local_node: node_handle,
            consensus_status,
            metrics,
            local_addr,
            task_handles,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn local_node(&self) -> &LocalNodeHandle {
        &self.local_node
    }

    pub fn consensus_status(&self) -> watch::Receiver<ConsensusStatus> {
        self.consensus_status.clone()
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Address accepting peers, when listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Stop the node gracefully.
    ///
    /// Signals every actor, then waits for them to finish (with timeout).
    pub async fn stop(mut self) -> Result<(), NodeError> {
        tracing::info!("keel node stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "some actors were still running at shutdown");
            return Err(NodeError::ShutdownTimeout);
        }

        tracing::info!(height = self.ledger.reader().current_height(), "keel node stopped");
        Ok(())
    }
}

/// Resolve `host:port` seed entries, skipping the ones that fail.
async fn resolve_seeds(seeds: &[String]) -> Vec<SocketAddr> {
    let mut addrs = Vec::new();
    for seed in seeds {
        match tokio::net::lookup_host(seed.as_str()).await {
            Ok(resolved) => addrs.extend(resolved),
            Err(e) => tracing::warn!(seed = %seed, error = %e, "seed could not be resolved"),
        }
    }
    addrs
}

/// Feeds ledger events and periodic actor snapshots into [`NodeMetrics`].
struct MetricsSampler {
    metrics: Arc<NodeMetrics>,
    ledger: LedgerHandle,
    node: LocalNodeHandle,
    consensus: watch::Receiver<ConsensusStatus>,
    events: broadcast::Receiver<LedgerEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl MetricsSampler {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(METRICS_SAMPLE_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                event = self.events.recv() => match event {
                    Ok(event) => self.metrics.observe_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "metrics sampler lagged behind ledger events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = interval.tick() => self.sample().await,
            }
        }
    }

    async fn sample(&self) {
        let reader = self.ledger.reader();
        self.metrics
            .observe_heights(reader.current_height(), reader.header_height());
        match self.ledger.pool_size().await {
            Ok((verified, unverified)) => self.metrics.observe_pool(verified, unverified),
            Err(e) => tracing::debug!(error = %e, "pool size unavailable"),
        }
        self.metrics.observe_peers(&self.node.stats().await);
        let status = *self.consensus.borrow();
        self.metrics.observe_consensus(&status);
    }
}
