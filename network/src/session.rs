//! One established connection.
//!
//! A session is spawned by the local node after the version/verack exchange
//! and owns the TCP stream from then on. A reader task decodes frames into
//! the session's mailbox; the session handles them one at a time and drains
//! its outbound queues between messages.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use keel_ledger::{LedgerError, LedgerHandle};
use keel_protocol::{
    read_message, write_message, AddrPayload, GetBlocksPayload, HeadersPayload, InvPayload,
    Message, ProtocolError, MAX_HASHES_PER_INV, MAX_HEADERS_COUNT,
};
use keel_types::{ConsensusPayload, Hash256, InventoryType};

use crate::hash_cache::HashCache;
use crate::local_node::LocalNodeHandle;
use crate::relay::{Inventory, RelayCache, RelayResult};
use crate::task_manager::TaskManagerHandle;
use crate::NetworkError;

pub type SessionId = u64;

/// A session with no inbound traffic for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest a session waits for the ledger's verdict on a relayed item.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);
const INBOUND_CHANNEL_CAPACITY: usize = 64;

pub enum SessionCommand {
    Send(Message),
    /// Announce an inventory unless the peer already has it.
    Relay(InvPayload),
    Disconnect,
}

/// Outbound queues and per-peer hash knowledge.
pub struct SessionState {
    high: VecDeque<Message>,
    low: VecDeque<Message>,
    /// Hashes the peer has shown it has.
    known: HashCache,
    /// Hashes we announced to the peer.
    sent: HashCache,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            high: VecDeque::new(),
            low: VecDeque::new(),
            known: HashCache::default(),
            sent: HashCache::default(),
        }
    }

    /// Queue `message`. Returns `false` when a single-flight command of
    /// the same kind is already waiting.
    pub fn enqueue(&mut self, message: Message) -> bool {
        let command = message.command();
        let queue = if command.is_high_priority() {
            &mut self.high
        } else {
            &mut self.low
        };
        if command.is_single_flight() && queue.iter().any(|m| m.command() == command) {
            return false;
        }
        queue.push_back(message);
        true
    }

    pub fn next_outbound(&mut self) -> Option<Message> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }

    pub fn queued(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn remember(&mut self, hash: Hash256) {
        self.known.insert(hash);
    }

    pub fn knows(&self, hash: &Hash256) -> bool {
        self.known.contains(hash)
    }

    pub fn announced(&self, hash: &Hash256) -> bool {
        self.sent.contains(hash)
    }

    /// Drop hashes the peer already has, record the rest as announced.
    pub fn announce(&mut self, inv: InvPayload) -> Option<InvPayload> {
        let hashes: Vec<Hash256> = inv
            .hashes
            .into_iter()
            .filter(|h| !self.known.contains(h))
            .collect();
        if hashes.is_empty() {
            return None;
        }
        for hash in &hashes {
            self.sent.insert(*hash);
        }
        Some(InvPayload::new(inv.kind, hashes))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a session talks to besides its peer.
#[derive(Clone)]
pub struct SessionContext {
    pub magic: u32,
    pub ledger: LedgerHandle,
    pub tasks: TaskManagerHandle,
    pub node: LocalNodeHandle,
    pub relay_cache: Arc<Mutex<RelayCache>>,
    pub consensus: Option<mpsc::Sender<ConsensusPayload>>,
}

pub(crate) fn lock_cache(cache: &Mutex<RelayCache>) -> MutexGuard<'_, RelayCache> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    ctx: SessionContext,
    state: SessionState,
    commands: mpsc::Receiver<SessionCommand>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        ctx: SessionContext,
        commands: mpsc::Receiver<SessionCommand>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            peer,
            ctx,
            state: SessionState::new(),
            commands,
            shutdown_rx,
        }
    }

    /// Serve the connection until either side closes it.
    pub async fn run(mut self, stream: TcpStream) -> Result<(), NetworkError> {
        let (mut read_half, mut write_half) = stream.into_split();
        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let magic = self.ctx.magic;
        let reader = tokio::spawn(async move {
            loop {
                let frame = read_message(&mut read_half, magic).await;
                let failed = frame.is_err();
                if inbound_tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        });

        tracing::debug!(session = self.id, peer = %self.peer, "session started");
        let result = self.event_loop(&mut inbound_rx, &mut write_half).await;
        reader.abort();
        result
    }

    async fn event_loop(
        &mut self,
        inbound: &mut mpsc::Receiver<Result<Message, ProtocolError>>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), NetworkError> {
        let idle = tokio::time::sleep(IDLE_TIMEOUT);
        tokio::pin!(idle);
        loop {
            while let Some(message) = self.state.next_outbound() {
                write_message(writer, self.ctx.magic, &message).await?;
            }
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => return Ok(()),
                frame = inbound.recv() => match frame {
                    Some(Ok(message)) => {
                        idle.as_mut().reset(Instant::now() + IDLE_TIMEOUT);
                        tracing::trace!(session = self.id, command = %message.command(), "received");
                        self.on_message(message).await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Send(message)) => {
                        self.state.enqueue(message);
                    }
                    Some(SessionCommand::Relay(inv)) => {
                        if let Some(inv) = self.state.announce(inv) {
                            self.state.enqueue(Message::Inv(inv));
                        }
                    }
                    Some(SessionCommand::Disconnect) | None => return Ok(()),
                },
                _ = &mut idle => return Err(NetworkError::Idle),
            }
        }
    }

    async fn on_message(&mut self, message: Message) -> Result<(), NetworkError> {
        match message {
            Message::Version(_) | Message::Verack => {
                return Err(ProtocolError::UnexpectedCommand {
                    command: message.command().as_str(),
                }
                .into());
            }
            Message::Addr(payload) => {
                let addrs = payload.addresses.into_iter().map(|a| a.address).collect();
                self.ctx.node.add_addresses(addrs).await;
            }
            Message::GetAddr => {
                let addresses = self.ctx.node.addresses().await;
                if !addresses.is_empty() {
                    self.state.enqueue(Message::Addr(AddrPayload { addresses }));
                }
            }
            Message::GetBlocks(payload) => self.on_get_blocks(payload),
            Message::GetHeaders(payload) => self.on_get_headers(payload)?,
            Message::Headers(payload) => {
                self.ctx.tasks.header_task_completed(self.id).await;
                if !payload.headers.is_empty() {
                    for header in &payload.headers {
                        self.state.remember(header.hash());
                    }
                    self.ctx.ledger.submit_headers(payload.headers).await?;
                }
            }
            Message::Inv(payload) => self.on_inv(payload).await,
            Message::GetData(payload) => self.on_get_data(payload).await?,
            Message::Block(block) => {
                let hash = block.hash();
                self.state.remember(hash);
                self.ctx.tasks.task_completed(self.id, hash).await;
                match self.submit(self.ctx.ledger.submit_block_timeout(block, SUBMIT_TIMEOUT)).await? {
                    RelayResult::Rejected(keel_ledger::VerifyResult::Invalid) => {
                        return Err(NetworkError::InvalidInventory("block"));
                    }
                    result => {
                        tracing::debug!(session = self.id, %hash, %result, "block relayed");
                    }
                }
            }
            Message::Tx(tx) => {
                let hash = tx.hash();
                self.state.remember(hash);
                self.ctx.tasks.task_completed(self.id, hash).await;
                let result = self
                    .submit(self.ctx.ledger.submit_transaction_timeout(tx, SUBMIT_TIMEOUT))
                    .await?;
                tracing::debug!(session = self.id, %hash, %result, "transaction relayed");
            }
            Message::Consensus(payload) => {
                let hash = payload.hash();
                self.state.remember(hash);
                self.ctx.tasks.task_completed(self.id, hash).await;
                if let Some(consensus) = &self.ctx.consensus {
                    if consensus.send(payload).await.is_err() {
                        tracing::debug!("consensus service gone, payload dropped");
                    }
                }
            }
            Message::Mempool => {
                let hashes: Vec<Hash256> = self
                    .ctx
                    .ledger
                    .verified_transactions()
                    .await?
                    .iter()
                    .map(|tx| tx.hash())
                    .collect();
                for inv in InvPayload::chunked(InventoryType::Tx, &hashes) {
                    if let Some(inv) = self.state.announce(inv) {
                        self.state.enqueue(Message::Inv(inv));
                    }
                }
            }
        }
        Ok(())
    }

    /// Turn a ledger verdict into a relay outcome. A slow ledger is not the
    /// peer's fault, so timeouts are reported as not relayed.
    async fn submit(
        &self,
        verdict: impl std::future::Future<Output = Result<keel_ledger::VerifyResult, LedgerError>>,
    ) -> Result<RelayResult, NetworkError> {
        match verdict.await {
            Ok(result) => Ok(RelayResult::from_verify(result)),
            Err(LedgerError::Timeout(after)) => {
                tracing::warn!(session = self.id, ?after, "ledger did not answer in time");
                Ok(RelayResult::NotRelayed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn on_get_blocks(&mut self, payload: GetBlocksPayload) {
        let reader = self.ctx.ledger.reader();
        let Some(mut hashes) = payload
            .hash_start
            .iter()
            .map(|start| reader.block_hashes_after(start, MAX_HASHES_PER_INV))
            .find(|hashes| !hashes.is_empty())
        else {
            return;
        };
        if let Some(stop) = hashes.iter().position(|h| *h == payload.hash_stop) {
            hashes.truncate(stop + 1);
        }
        if let Some(inv) = self.state.announce(InvPayload::new(InventoryType::Block, hashes)) {
            self.state.enqueue(Message::Inv(inv));
        }
    }

    fn on_get_headers(&mut self, payload: GetBlocksPayload) -> Result<(), NetworkError> {
        let reader = self.ctx.ledger.reader();
        let mut headers = Vec::new();
        for start in &payload.hash_start {
            headers = reader
                .headers_after(start, MAX_HEADERS_COUNT)
                .map_err(LedgerError::from)?;
            if !headers.is_empty() {
                break;
            }
        }
        if let Some(stop) = headers.iter().position(|h| h.hash() == payload.hash_stop) {
            headers.truncate(stop + 1);
        }
        // Answer even when empty so the peer's header task completes.
        self.state.enqueue(Message::Headers(HeadersPayload { headers }));
        Ok(())
    }

    async fn on_inv(&mut self, payload: InvPayload) {
        let reader = self.ctx.ledger.reader();
        let mut wanted = Vec::with_capacity(payload.hashes.len());
        for hash in payload.hashes {
            self.state.remember(hash);
            let stored = match payload.kind {
                InventoryType::Block => reader.contains_block(&hash),
                InventoryType::Tx => reader.contains_transaction(&hash),
                InventoryType::Consensus => Ok(false),
            };
            if !stored.unwrap_or(false) {
                wanted.push(hash);
            }
        }
        if !wanted.is_empty() {
            self.ctx
                .tasks
                .new_tasks(self.id, InvPayload::new(payload.kind, wanted))
                .await;
        }
    }

    async fn on_get_data(&mut self, payload: InvPayload) -> Result<(), NetworkError> {
        let mut missing = Vec::new();
        {
            let cache = lock_cache(&self.ctx.relay_cache);
            for hash in &payload.hashes {
                // Unconfirmed items are served only to peers we announced them to.
                if payload.kind != InventoryType::Block && !self.state.announced(hash) {
                    continue;
                }
                match cache.get(hash) {
                    Some(inventory) if inventory.kind() == payload.kind => {
                        self.state.enqueue(inventory.to_message());
                    }
                    _ => missing.push(*hash),
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let reader = self.ctx.ledger.reader();
        match payload.kind {
            InventoryType::Block => {
                for hash in &missing {
                    if let Some(block) = reader.block(hash).map_err(LedgerError::from)? {
                        self.state.enqueue(Message::Block(block));
                    }
                }
            }
            InventoryType::Tx => {
                let pooled = self.ctx.ledger.pool_transactions(missing.clone()).await?;
                for (hash, tx) in missing.iter().zip(pooled) {
                    let tx = match tx {
                        Some(tx) => Some(tx),
                        None => reader
                            .transaction(hash)
                            .map_err(LedgerError::from)?
                            .map(|(tx, _)| tx),
                    };
                    if let Some(tx) = tx {
                        self.state.enqueue(Message::Tx(tx));
                    }
                }
            }
            InventoryType::Consensus => {}
        }
        Ok(())
    }
}

/// Cache `inventory` for `getdata` and wrap it as an announcement.
pub(crate) fn cache_inventory(cache: &Mutex<RelayCache>, inventory: Inventory) -> Option<InvPayload> {
    let kind = inventory.kind();
    let hash = inventory.hash();
    lock_cache(cache)
        .insert(inventory)
        .then(|| InvPayload::new(kind, vec![hash]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash256 {
        Hash256::new([n; 32])
    }

    #[test]
    fn high_priority_messages_jump_the_queue() {
        let mut state = SessionState::new();
        state.enqueue(Message::Inv(InvPayload::new(InventoryType::Tx, vec![h(1)])));
        state.enqueue(Message::GetAddr);
        assert_eq!(state.next_outbound(), Some(Message::GetAddr));
        assert!(matches!(state.next_outbound(), Some(Message::Inv(_))));
        assert_eq!(state.next_outbound(), None);
    }

    #[test]
    fn single_flight_commands_are_not_queued_twice() {
        let mut state = SessionState::new();
        assert!(state.enqueue(Message::GetBlocks(GetBlocksPayload::from(h(1)))));
        assert!(!state.enqueue(Message::GetBlocks(GetBlocksPayload::from(h(2)))));
        assert!(state.enqueue(Message::Mempool));
        assert!(!state.enqueue(Message::Mempool));
        let inv = Message::Inv(InvPayload::new(InventoryType::Tx, vec![h(1)]));
        assert!(state.enqueue(inv.clone()));
        assert!(state.enqueue(inv));
        assert_eq!(state.queued(), 4);

        state.next_outbound();
        assert!(state.enqueue(Message::Mempool));
    }

    #[test]
    fn announcements_skip_what_the_peer_has() {
        let mut state = SessionState::new();
        state.remember(h(1));
        let inv = state
            .announce(InvPayload::new(InventoryType::Tx, vec![h(1), h(2)]))
            .unwrap();
        assert_eq!(inv.hashes, vec![h(2)]);
        assert!(state.announced(&h(2)));
        assert!(!state.announced(&h(1)));
        assert!(state
            .announce(InvPayload::new(InventoryType::Tx, vec![h(1)]))
            .is_none());
    }
}
