//! The local node: accepts and dials connections, runs handshakes, owns the
//! session registry, and relays inventories the ledger accepted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use keel_ledger::{LedgerEvent, LedgerHandle};
use keel_protocol::{
    handshake, GetBlocksPayload, Message, NetworkAddress, VersionPayload, MAX_ADDR_TO_SEND,
    PROTOCOL_VERSION, SERVICE_FULL_NODE,
};
use keel_types::{ConsensusPayload, Timestamp};

use crate::peer_manager::{PeerLimits, PeerManager};
use crate::relay::{Inventory, RelayCache, RelayResult};
use crate::session::{cache_inventory, Session, SessionCommand, SessionContext, SessionId};
use crate::task_manager::{TaskAction, TaskManagerHandle};
use crate::NetworkError;

/// How often the node tops up its outbound connections.
const CONNECT_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_CHANNEL_CAPACITY: usize = 1024;
const SESSION_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalNodeConfig {
    pub magic: u32,
    /// Port announced in `version`; 0 when not listening.
    pub listen_port: u16,
    pub seeds: Vec<SocketAddr>,
    pub limits: PeerLimits,
    pub user_agent: String,
    /// Ask peers to relay transactions and consensus payloads to us.
    pub relay: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub connected: usize,
    pub unconnected: usize,
    /// Sessions closed since the node started.
    pub disconnects: u64,
}

pub enum NodeCommand {
    Connect(SocketAddr),
    Handshaked {
        addr: SocketAddr,
        inbound: bool,
        stream: TcpStream,
        version: VersionPayload,
    },
    HandshakeFailed {
        addr: SocketAddr,
        inbound: bool,
        error: NetworkError,
    },
    SessionClosed {
        session: SessionId,
        error: Option<NetworkError>,
    },
    Execute(TaskAction),
    SendTo {
        session: SessionId,
        message: Message,
    },
    AddAddresses(Vec<SocketAddr>),
    Addresses {
        reply: oneshot::Sender<Vec<NetworkAddress>>,
    },
    Relay {
        inventory: Inventory,
        reply: Option<oneshot::Sender<RelayResult>>,
    },
    Stats {
        reply: oneshot::Sender<NodeStats>,
    },
}

#[derive(Clone)]
pub struct LocalNodeHandle {
    commands: mpsc::Sender<NodeCommand>,
}

impl LocalNodeHandle {
    async fn send(&self, command: NodeCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("local node stopped, command dropped");
        }
    }

    pub async fn connect(&self, addr: SocketAddr) {
        self.send(NodeCommand::Connect(addr)).await
    }

    pub async fn execute(&self, action: TaskAction) {
        self.send(NodeCommand::Execute(action)).await
    }

    pub async fn send_to(&self, session: SessionId, message: Message) {
        self.send(NodeCommand::SendTo { session, message }).await
    }

    pub async fn add_addresses(&self, addrs: Vec<SocketAddr>) {
        self.send(NodeCommand::AddAddresses(addrs)).await
    }

    /// Listener addresses of connected peers, for `addr` replies.
    pub async fn addresses(&self) -> Vec<NetworkAddress> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Addresses { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Cache and announce a consensus payload.
    pub async fn relay_consensus(&self, payload: ConsensusPayload) -> RelayResult {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Relay {
            inventory: Inventory::Consensus(Arc::new(payload)),
            reply: Some(reply),
        })
        .await;
        rx.await.unwrap_or(RelayResult::NotRelayed)
    }

    pub async fn stats(&self) -> NodeStats {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Stats { reply }).await;
        rx.await.unwrap_or_default()
    }
}

struct SessionEntry {
    addr: SocketAddr,
    /// Where the peer accepts connections, if it listens.
    listener: Option<SocketAddr>,
    nonce: u32,
    relay: bool,
    commands: mpsc::Sender<SessionCommand>,
}

pub struct LocalNode {
    config: LocalNodeConfig,
    nonce: u32,
    peers: PeerManager,
    sessions: HashMap<SessionId, SessionEntry>,
    next_session: SessionId,
    disconnects: u64,
    relay_cache: Arc<Mutex<RelayCache>>,
    ledger: LedgerHandle,
    tasks: TaskManagerHandle,
    consensus: Option<mpsc::Sender<ConsensusPayload>>,
    handle: LocalNodeHandle,
    commands: mpsc::Receiver<NodeCommand>,
    ledger_events: broadcast::Receiver<LedgerEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl LocalNode {
    pub fn new(
        config: LocalNodeConfig,
        ledger: LedgerHandle,
        tasks: TaskManagerHandle,
        consensus: Option<mpsc::Sender<ConsensusPayload>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, LocalNodeHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = LocalNodeHandle { commands: tx };
        let ledger_events = ledger.subscribe();
        let node = Self {
            peers: PeerManager::new(config.limits.clone()),
            config,
            nonce: rand::thread_rng().gen(),
            sessions: HashMap::new(),
            next_session: 1,
            disconnects: 0,
            relay_cache: Arc::new(Mutex::new(RelayCache::default())),
            ledger,
            tasks,
            consensus,
            handle: handle.clone(),
            commands,
            ledger_events,
            shutdown_rx,
        };
        (node, handle)
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub async fn run(mut self, listener: Option<TcpListener>) {
        if let Some(local) = listener.as_ref().and_then(|l| l.local_addr().ok()) {
            tracing::info!(%local, "accepting peers");
            self.peers.add_local(local);
        }
        self.peers.add_unconnected(self.config.seeds.clone());
        let mut connect_timer = tokio::time::interval(CONNECT_INTERVAL);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("local node shutting down");
                    break;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                accepted = accept(listener.as_ref()) => match accepted {
                    Ok((stream, addr)) => self.on_accept(stream, addr),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                event = self.ledger_events.recv() => match event {
                    Ok(event) => self.on_ledger_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "local node lagged behind ledger events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = connect_timer.tick() => self.connect_more(),
            }
        }
    }

    async fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Connect(addr) => {
                self.peers.mark_connecting(addr);
                self.spawn_outbound(addr);
            }
            NodeCommand::Handshaked {
                addr,
                inbound,
                stream,
                version,
            } => self.on_handshaked(addr, inbound, stream, version).await,
            NodeCommand::HandshakeFailed {
                addr,
                inbound,
                error,
            } => {
                tracing::debug!(peer = %addr, inbound, error = %error, "handshake failed");
                self.peers.connect_failed(&addr);
                if let Some(reason) = error.penalty() {
                    self.peers.penalize(addr.ip(), reason, now());
                }
            }
            NodeCommand::SessionClosed { session, error } => {
                self.on_session_closed(session, error).await
            }
            NodeCommand::Execute(action) => {
                let session = action.session();
                let message = match action {
                    TaskAction::SendGetData { inv, .. } => Message::GetData(inv),
                    TaskAction::SendGetHeaders { start, .. } => {
                        Message::GetHeaders(GetBlocksPayload::from(start))
                    }
                    TaskAction::SendGetBlocks { start, .. } => {
                        Message::GetBlocks(GetBlocksPayload::from(start))
                    }
                };
                self.send_to(session, message);
            }
            NodeCommand::SendTo { session, message } => self.send_to(session, message),
            NodeCommand::AddAddresses(addrs) => self.peers.add_unconnected(addrs),
            NodeCommand::Addresses { reply } => {
                let _ = reply.send(self.listener_addresses());
            }
            NodeCommand::Relay { inventory, reply } => {
                let result = self.relay(inventory);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            NodeCommand::Stats { reply } => {
                let _ = reply.send(NodeStats {
                    connected: self.sessions.len(),
                    unconnected: self.peers.unconnected_count(),
                    disconnects: self.disconnects,
                });
            }
        }
    }

    fn local_version(&self) -> VersionPayload {
        VersionPayload {
            version: PROTOCOL_VERSION,
            services: SERVICE_FULL_NODE,
            timestamp: Timestamp::now(),
            port: self.config.listen_port,
            nonce: self.nonce,
            user_agent: self.config.user_agent.clone(),
            start_height: self.ledger.reader().current_height(),
            relay: self.config.relay,
        }
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if !self.peers.allow(&addr) {
            tracing::debug!(peer = %addr, "inbound connection refused");
            return;
        }
        self.spawn_handshake(addr, true, async move { Ok(stream) });
    }

    fn spawn_outbound(&mut self, addr: SocketAddr) {
        self.spawn_handshake(addr, false, async move {
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| NetworkError::ConnectionFailed(format!("timed out dialing {addr}")))?
                .map_err(NetworkError::from)
        });
    }

    fn spawn_handshake<F>(&self, addr: SocketAddr, inbound: bool, open: F)
    where
        F: std::future::Future<Output = Result<TcpStream, NetworkError>> + Send + 'static,
    {
        let local = self.local_version();
        let magic = self.config.magic;
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let outcome = async {
                let mut stream = open.await?;
                let version =
                    handshake::perform(&mut stream, magic, local, HANDSHAKE_TIMEOUT).await?;
                Ok::<_, NetworkError>((stream, version))
            }
            .await;
            let command = match outcome {
                Ok((stream, version)) => NodeCommand::Handshaked {
                    addr,
                    inbound,
                    stream,
                    version,
                },
                Err(error) => NodeCommand::HandshakeFailed {
                    addr,
                    inbound,
                    error,
                },
            };
            handle.send(command).await;
        });
    }

    async fn on_handshaked(
        &mut self,
        addr: SocketAddr,
        inbound: bool,
        stream: TcpStream,
        version: VersionPayload,
    ) {
        if self.sessions.values().any(|s| s.nonce == version.nonce) {
            tracing::debug!(peer = %addr, "already connected to this node");
            self.peers.connect_failed(&addr);
            return;
        }
        if !self.peers.allow(&addr) {
            tracing::debug!(peer = %addr, "connection limit reached");
            self.peers.connect_failed(&addr);
            return;
        }

        let id = self.next_session;
        self.next_session += 1;
        self.peers.mark_connected(addr, now());
        let (commands_tx, commands_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        self.sessions.insert(
            id,
            SessionEntry {
                addr,
                listener: (version.port != 0).then(|| SocketAddr::new(addr.ip(), version.port)),
                nonce: version.nonce,
                relay: version.relay,
                commands: commands_tx,
            },
        );

        let ctx = SessionContext {
            magic: self.config.magic,
            ledger: self.ledger.clone(),
            tasks: self.tasks.clone(),
            node: self.handle.clone(),
            relay_cache: Arc::clone(&self.relay_cache),
            consensus: self.consensus.clone(),
        };
        // Registered first so the session's own inventories find it known.
        self.tasks.register(id, version.start_height).await;
        let session = Session::new(id, addr, ctx, commands_rx, self.shutdown_rx.resubscribe());
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let error = session.run(stream).await.err();
            handle
                .send(NodeCommand::SessionClosed { session: id, error })
                .await;
        });

        tracing::info!(
            session = id,
            peer = %addr,
            inbound,
            start_height = version.start_height,
            user_agent = %version.user_agent,
            "session established"
        );
    }

    async fn on_session_closed(&mut self, session: SessionId, error: Option<NetworkError>) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        self.disconnects += 1;
        self.peers.mark_disconnected(&entry.addr);
        match &error {
            Some(e) => {
                tracing::info!(session, peer = %entry.addr, error = %e, "session closed");
                if let Some(reason) = e.penalty() {
                    self.peers.penalize(entry.addr.ip(), reason, now());
                }
            }
            None => tracing::info!(session, peer = %entry.addr, "session closed"),
        }
        self.tasks.disconnected(session).await;
    }

    fn send_to(&self, session: SessionId, message: Message) {
        let Some(entry) = self.sessions.get(&session) else {
            return;
        };
        if entry
            .commands
            .try_send(SessionCommand::Send(message))
            .is_err()
        {
            tracing::debug!(session, "session mailbox full or closed");
        }
    }

    fn listener_addresses(&self) -> Vec<NetworkAddress> {
        let timestamp = Timestamp::now();
        self.sessions
            .values()
            .filter_map(|s| s.listener)
            .take(MAX_ADDR_TO_SEND)
            .map(|address| NetworkAddress {
                timestamp,
                services: SERVICE_FULL_NODE,
                address,
            })
            .collect()
    }

    fn relay(&mut self, inventory: Inventory) -> RelayResult {
        let kind = inventory.kind();
        let Some(inv) = cache_inventory(&self.relay_cache, inventory) else {
            return RelayResult::Duplicate;
        };
        let mut relayed = false;
        for entry in self.sessions.values() {
            if kind != keel_types::InventoryType::Block && !entry.relay {
                continue;
            }
            relayed |= entry
                .commands
                .try_send(SessionCommand::Relay(inv.clone()))
                .is_ok();
        }
        if relayed {
            RelayResult::Accepted
        } else {
            RelayResult::NotRelayed
        }
    }

    fn on_ledger_event(&mut self, event: LedgerEvent) {
        let inventory = match event {
            LedgerEvent::BlockAccepted(block) => Inventory::Block(block),
            LedgerEvent::TransactionAccepted(tx) => Inventory::Transaction(tx),
            LedgerEvent::PersistCompleted { .. }
            | LedgerEvent::TransactionRejected { .. }
            | LedgerEvent::HeadersExtended { .. } => return,
        };
        let hash = inventory.hash();
        let result = self.relay(inventory);
        tracing::trace!(%hash, %result, "relayed");
    }

    fn connect_more(&mut self) {
        if !self.peers.needs_peers() {
            return;
        }
        if self.peers.unconnected_count() == 0 {
            for entry in self.sessions.values() {
                let _ = entry.commands.try_send(SessionCommand::Send(Message::GetAddr));
            }
            return;
        }
        let wanted = self
            .peers
            .limits()
            .min_desired
            .saturating_sub(self.sessions.len());
        for addr in self.peers.take_candidates(wanted, now()) {
            tracing::debug!(peer = %addr, "dialing");
            self.spawn_outbound(addr);
        }
    }
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

fn now() -> u64 {
    Timestamp::now().as_secs()
}
