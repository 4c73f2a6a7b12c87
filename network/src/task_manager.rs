//! Synchronization task bookkeeping.
//!
//! [`TaskManager`] is a pure state machine: every input returns the requests
//! to send as [`TaskAction`]s. [`TaskManagerService`] owns one, feeds it from
//! its mailbox and the ledger's events, and hands the actions to the local
//! node.
//!
//! Rules kept by the core:
//! - a hash is in flight on at most one session;
//! - a session has at most one outstanding `getdata` batch;
//! - a request that times out goes back to the pending pool and is never
//!   handed to the session it timed out on;
//! - a disconnected session's requests go back to the pending pool;
//! - one header request is in flight at a time;
//! - while the header chain is behind a session's announced height, that
//!   session asks for headers first and its block requests wait.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use keel_ledger::{LedgerEvent, LedgerReader};
use keel_protocol::{InvPayload, MAX_HASHES_PER_INV};
use keel_types::{Hash256, InventoryType, Timestamp};

use crate::local_node::LocalNodeHandle;
use crate::session::SessionId;

/// A request is abandoned after this long without an answer.
pub const TASK_TIMEOUT_SECS: u64 = 60;
/// Completed hashes are not requested again for this long.
pub const KNOWN_HASH_TTL_SECS: u64 = 300;
const TIMER_INTERVAL: Duration = Duration::from_secs(30);
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// The slice of chain state task assignment depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainView {
    pub height: u32,
    pub header_height: u32,
    pub current_block_hash: Hash256,
    pub current_header_hash: Hash256,
}

impl ChainView {
    pub fn from_reader(reader: &LedgerReader) -> Self {
        Self {
            height: reader.current_height(),
            header_height: reader.header_height(),
            current_block_hash: reader.current_block_hash(),
            current_header_hash: reader.current_header_hash(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskAction {
    SendGetData { session: SessionId, inv: InvPayload },
    SendGetHeaders { session: SessionId, start: Hash256 },
    SendGetBlocks { session: SessionId, start: Hash256 },
}

impl TaskAction {
    pub fn session(&self) -> SessionId {
        match self {
            TaskAction::SendGetData { session, .. }
            | TaskAction::SendGetHeaders { session, .. }
            | TaskAction::SendGetBlocks { session, .. } => *session,
        }
    }
}

#[derive(Default)]
struct TaskSession {
    start_height: u32,
    /// Requested hashes and when they were asked for.
    tasks: HashMap<Hash256, (InventoryType, u64)>,
    /// Hashes this peer announced that are not assigned yet.
    available: VecDeque<(InventoryType, Hash256)>,
    /// Hashes that timed out on this session.
    excluded: HashSet<Hash256>,
    getblocks_at: Option<u64>,
}

impl TaskSession {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Default)]
pub struct TaskManager {
    sessions: BTreeMap<SessionId, TaskSession>,
    /// Owner of every in-flight hash.
    in_flight: HashMap<Hash256, SessionId>,
    /// Recently completed hashes with their completion time.
    known_hashes: HashMap<Hash256, u64>,
    /// Hashes returned by failed sessions, awaiting a new owner.
    pending: VecDeque<(InventoryType, Hash256)>,
    header_task: Option<(SessionId, u64)>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_in_flight(&self, hash: &Hash256) -> bool {
        self.in_flight.contains_key(hash)
    }

    /// The session a hash is currently requested from.
    pub fn owner(&self, hash: &Hash256) -> Option<SessionId> {
        self.in_flight.get(hash).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding(&self, session: SessionId) -> usize {
        self.sessions.get(&session).map_or(0, |s| s.tasks.len())
    }

    pub fn has_header_task(&self) -> bool {
        self.header_task.is_some()
    }

    pub fn register(
        &mut self,
        session: SessionId,
        start_height: u32,
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        self.sessions.insert(
            session,
            TaskSession {
                start_height,
                ..TaskSession::default()
            },
        );
        self.request_tasks(session, chain, now).into_iter().collect()
    }

    /// `session` announced `hashes`.
    pub fn new_tasks(
        &mut self,
        session: SessionId,
        kind: InventoryType,
        hashes: &[Hash256],
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return Vec::new();
        };
        if kind == InventoryType::Block {
            entry.getblocks_at = None;
        }
        for hash in hashes {
            if self.known_hashes.contains_key(hash)
                || entry.tasks.contains_key(hash)
                || entry.available.iter().any(|(_, h)| h == hash)
            {
                continue;
            }
            entry.available.push_back((kind, *hash));
        }
        self.request_tasks(session, chain, now).into_iter().collect()
    }

    /// An inventory arrived. `session` is the sender if known.
    pub fn completed(
        &mut self,
        session: Option<SessionId>,
        hash: &Hash256,
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        self.known_hashes.insert(*hash, now);
        self.pending.retain(|(_, h)| h != hash);
        let owner = self.in_flight.remove(hash);
        for entry in self.sessions.values_mut() {
            entry.available.retain(|(_, h)| h != hash);
        }
        if let Some(id) = owner {
            if let Some(entry) = self.sessions.get_mut(&id) {
                entry.tasks.remove(hash);
            }
        }
        let mut freed: Vec<SessionId> = owner.into_iter().collect();
        if let Some(id) = session {
            if !freed.contains(&id) {
                freed.push(id);
            }
        }
        self.assign_idle(freed, chain, now)
    }

    pub fn header_task_completed(
        &mut self,
        session: SessionId,
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        if matches!(self.header_task, Some((owner, _)) if owner == session) {
            self.header_task = None;
        }
        self.assign_idle(self.sessions.keys().copied().collect(), chain, now)
    }

    /// Forget that `hashes` were ever fetched and request them again.
    pub fn restart(
        &mut self,
        kind: InventoryType,
        hashes: &[Hash256],
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        for hash in hashes {
            self.known_hashes.remove(hash);
            if !self.in_flight.contains_key(hash) && !self.pending.iter().any(|(_, h)| h == hash)
            {
                self.pending.push_back((kind, *hash));
            }
        }
        self.assign_idle(self.sessions.keys().copied().collect(), chain, now)
    }

    pub fn disconnected(
        &mut self,
        session: SessionId,
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        let Some(entry) = self.sessions.remove(&session) else {
            return Vec::new();
        };
        if matches!(self.header_task, Some((owner, _)) if owner == session) {
            self.header_task = None;
        }
        for (hash, (kind, _)) in entry.tasks {
            self.in_flight.remove(&hash);
            self.pending.push_back((kind, hash));
        }
        self.assign_idle(self.sessions.keys().copied().collect(), chain, now)
    }

    /// Expire timed-out requests and stale knowledge, then reassign.
    pub fn on_timer(&mut self, chain: &ChainView, now: u64) -> Vec<TaskAction> {
        self.known_hashes
            .retain(|_, at| now.saturating_sub(*at) < KNOWN_HASH_TTL_SECS);

        if matches!(self.header_task, Some((_, at)) if now.saturating_sub(at) >= TASK_TIMEOUT_SECS)
        {
            self.header_task = None;
        }

        for (id, entry) in self.sessions.iter_mut() {
            let expired: Vec<(Hash256, InventoryType)> = entry
                .tasks
                .iter()
                .filter(|(_, (_, at))| now.saturating_sub(*at) >= TASK_TIMEOUT_SECS)
                .map(|(hash, (kind, _))| (*hash, *kind))
                .collect();
            for (hash, kind) in expired {
                tracing::debug!(session = id, %hash, "task timed out");
                entry.tasks.remove(&hash);
                entry.excluded.insert(hash);
                entry.available.retain(|(_, h)| *h != hash);
                self.in_flight.remove(&hash);
                self.pending.push_back((kind, hash));
            }
            if matches!(entry.getblocks_at, Some(at) if now.saturating_sub(at) >= TASK_TIMEOUT_SECS)
            {
                entry.getblocks_at = None;
            }
        }
        self.assign_idle(self.sessions.keys().copied().collect(), chain, now)
    }

    /// Chain state moved: give idle sessions new work.
    pub fn on_chain_changed(&mut self, chain: &ChainView, now: u64) -> Vec<TaskAction> {
        self.assign_idle(self.sessions.keys().copied().collect(), chain, now)
    }

    fn assign_idle(
        &mut self,
        sessions: Vec<SessionId>,
        chain: &ChainView,
        now: u64,
    ) -> Vec<TaskAction> {
        sessions
            .into_iter()
            .filter_map(|id| self.request_tasks(id, chain, now))
            .collect()
    }

    fn request_tasks(&mut self, id: SessionId, chain: &ChainView, now: u64) -> Option<TaskAction> {
        let entry = self.sessions.get_mut(&id)?;
        if !entry.is_idle() {
            return None;
        }

        let syncing_headers = chain.header_height < entry.start_height;
        if syncing_headers && self.header_task.is_none() {
            self.header_task = Some((id, now));
            return Some(TaskAction::SendGetHeaders {
                session: id,
                start: chain.current_header_hash,
            });
        }
        let deferred = |kind: InventoryType| syncing_headers && kind == InventoryType::Block;

        // Hashes the peer announced, then hashes other sessions dropped.
        let mut batch: Vec<Hash256> = Vec::new();
        let mut batch_kind = None;
        let usable = |hash: &Hash256, in_flight: &HashMap<Hash256, SessionId>, known: &HashMap<Hash256, u64>| {
            !in_flight.contains_key(hash) && !known.contains_key(hash)
        };
        entry
            .available
            .retain(|(_, hash)| usable(hash, &self.in_flight, &self.known_hashes));
        let mut rest = VecDeque::new();
        while let Some((kind, hash)) = entry.available.pop_front() {
            if batch.len() < MAX_HASHES_PER_INV
                && !deferred(kind)
                && batch_kind.map_or(true, |k| k == kind)
            {
                batch_kind = Some(kind);
                batch.push(hash);
            } else {
                rest.push_back((kind, hash));
            }
        }
        entry.available = rest;

        let mut keep = VecDeque::new();
        while let Some((kind, hash)) = self.pending.pop_front() {
            let takes = batch.len() < MAX_HASHES_PER_INV
                && !deferred(kind)
                && batch_kind.map_or(true, |k| k == kind)
                && !entry.excluded.contains(&hash)
                && !batch.contains(&hash)
                && usable(&hash, &self.in_flight, &self.known_hashes);
            if takes {
                batch_kind = Some(kind);
                batch.push(hash);
            } else {
                keep.push_back((kind, hash));
            }
        }
        self.pending = keep;

        if let Some(kind) = batch_kind {
            for hash in &batch {
                entry.tasks.insert(*hash, (kind, now));
                self.in_flight.insert(*hash, id);
            }
            return Some(TaskAction::SendGetData {
                session: id,
                inv: InvPayload::new(kind, batch),
            });
        }

        if !syncing_headers && chain.height < chain.header_height && entry.getblocks_at.is_none() {
            entry.getblocks_at = Some(now);
            return Some(TaskAction::SendGetBlocks {
                session: id,
                start: chain.current_block_hash,
            });
        }
        None
    }
}

pub enum TaskCommand {
    Register { session: SessionId, start_height: u32 },
    NewTasks { session: SessionId, inv: InvPayload },
    TaskCompleted { session: SessionId, hash: Hash256 },
    HeaderTaskCompleted { session: SessionId },
    RestartTasks { inv: InvPayload },
    Disconnected { session: SessionId },
}

#[derive(Clone)]
pub struct TaskManagerHandle {
    commands: mpsc::Sender<TaskCommand>,
}

impl TaskManagerHandle {
    async fn send(&self, command: TaskCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("task manager stopped, command dropped");
        }
    }

    pub async fn register(&self, session: SessionId, start_height: u32) {
        self.send(TaskCommand::Register {
            session,
            start_height,
        })
        .await
    }

    pub async fn new_tasks(&self, session: SessionId, inv: InvPayload) {
        self.send(TaskCommand::NewTasks { session, inv }).await
    }

    pub async fn task_completed(&self, session: SessionId, hash: Hash256) {
        self.send(TaskCommand::TaskCompleted { session, hash }).await
    }

    pub async fn header_task_completed(&self, session: SessionId) {
        self.send(TaskCommand::HeaderTaskCompleted { session }).await
    }

    pub async fn restart_tasks(&self, inv: InvPayload) {
        self.send(TaskCommand::RestartTasks { inv }).await
    }

    pub async fn disconnected(&self, session: SessionId) {
        self.send(TaskCommand::Disconnected { session }).await
    }
}

pub struct TaskManagerService {
    core: TaskManager,
    reader: LedgerReader,
    commands: mpsc::Receiver<TaskCommand>,
    ledger_events: broadcast::Receiver<LedgerEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl TaskManagerService {
    pub fn new(
        reader: LedgerReader,
        ledger_events: broadcast::Receiver<LedgerEvent>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, TaskManagerHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let service = Self {
            core: TaskManager::new(),
            reader,
            commands,
            ledger_events,
            shutdown_rx,
        };
        (service, TaskManagerHandle { commands: tx })
    }

    pub async fn run(mut self, node: LocalNodeHandle) {
        let mut timer = tokio::time::interval(TIMER_INTERVAL);
        loop {
            let actions = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("task manager shutting down");
                    break;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command)
                }
                event = self.ledger_events.recv() => match event {
                    Ok(event) => self.on_ledger_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "task manager lagged behind ledger events");
                        let chain = self.chain();
                        self.core.on_chain_changed(&chain, now())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = timer.tick() => {
                    let chain = self.chain();
                    self.core.on_timer(&chain, now())
                }
            };
            for action in actions {
                node.execute(action).await;
            }
        }
    }

    fn chain(&self) -> ChainView {
        ChainView::from_reader(&self.reader)
    }

    fn handle(&mut self, command: TaskCommand) -> Vec<TaskAction> {
        let chain = self.chain();
        let now = now();
        match command {
            TaskCommand::Register {
                session,
                start_height,
            } => self.core.register(session, start_height, &chain, now),
            TaskCommand::NewTasks { session, inv } => {
                self.core.new_tasks(session, inv.kind, &inv.hashes, &chain, now)
            }
            TaskCommand::TaskCompleted { session, hash } => {
                self.core.completed(Some(session), &hash, &chain, now)
            }
            TaskCommand::HeaderTaskCompleted { session } => {
                self.core.header_task_completed(session, &chain, now)
            }
            TaskCommand::RestartTasks { inv } => {
                self.core.restart(inv.kind, &inv.hashes, &chain, now)
            }
            TaskCommand::Disconnected { session } => {
                self.core.disconnected(session, &chain, now)
            }
        }
    }

    fn on_ledger_event(&mut self, event: LedgerEvent) -> Vec<TaskAction> {
        let chain = self.chain();
        match event {
            LedgerEvent::PersistCompleted { block, .. } => {
                self.core.completed(None, &block.hash(), &chain, now())
            }
            LedgerEvent::HeadersExtended { .. } => self.core.on_chain_changed(&chain, now()),
            LedgerEvent::TransactionAccepted(tx) => {
                self.core.completed(None, &tx.hash(), &chain, now())
            }
            LedgerEvent::BlockAccepted(_) | LedgerEvent::TransactionRejected { .. } => Vec::new(),
        }
    }
}

fn now() -> u64 {
    Timestamp::now().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u16) -> Hash256 {
        Hash256::digest(&n.to_le_bytes())
    }

    fn synced() -> ChainView {
        ChainView {
            height: 10,
            header_height: 10,
            current_block_hash: h(1000),
            current_header_hash: h(1000),
        }
    }

    fn getdata_hashes(actions: &[TaskAction], session: SessionId) -> Vec<Hash256> {
        actions
            .iter()
            .filter_map(|a| match a {
                TaskAction::SendGetData { session: s, inv } if *s == session => {
                    Some(inv.hashes.clone())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn shared_announcement_is_requested_once() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.register(2, 10, &chain, 0);

        let first = tm.new_tasks(1, InventoryType::Tx, &[h(1), h(2)], &chain, 0);
        assert_eq!(getdata_hashes(&first, 1), vec![h(1), h(2)]);
        let second = tm.new_tasks(2, InventoryType::Tx, &[h(2), h(3)], &chain, 0);
        assert_eq!(getdata_hashes(&second, 2), vec![h(3)]);
        assert_eq!(tm.owner(&h(2)), Some(1));
    }

    #[test]
    fn busy_session_gets_one_batch_at_a_time() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.new_tasks(1, InventoryType::Tx, &[h(1)], &chain, 0);
        assert!(tm.new_tasks(1, InventoryType::Tx, &[h(2)], &chain, 0).is_empty());

        let next = tm.completed(Some(1), &h(1), &chain, 1);
        assert_eq!(getdata_hashes(&next, 1), vec![h(2)]);
    }

    #[test]
    fn batches_do_not_mix_kinds_or_exceed_the_limit() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        let many: Vec<Hash256> = (0..(MAX_HASHES_PER_INV as u16 + 5)).map(h).collect();
        let actions = tm.new_tasks(1, InventoryType::Block, &many, &chain, 0);
        assert_eq!(getdata_hashes(&actions, 1).len(), MAX_HASHES_PER_INV);
        assert_eq!(tm.outstanding(1), MAX_HASHES_PER_INV);
    }

    #[test]
    fn timed_out_task_moves_to_a_different_session() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.register(2, 10, &chain, 0);
        tm.new_tasks(1, InventoryType::Block, &[h(7)], &chain, 0);
        // Session 2 is busy when the timeout fires.
        tm.new_tasks(2, InventoryType::Tx, &[h(8)], &chain, 0);

        let actions = tm.on_timer(&chain, TASK_TIMEOUT_SECS);
        // Both timed out; each went to the other session, never back.
        assert_eq!(getdata_hashes(&actions, 1), vec![h(8)]);
        assert_eq!(getdata_hashes(&actions, 2), vec![h(7)]);
        assert_eq!(tm.owner(&h(7)), Some(2));
    }

    #[test]
    fn timed_out_task_with_no_other_session_stays_pending() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.new_tasks(1, InventoryType::Tx, &[h(5)], &chain, 0);

        let actions = tm.on_timer(&chain, TASK_TIMEOUT_SECS);
        assert!(getdata_hashes(&actions, 1).is_empty());
        assert_eq!(tm.pending_count(), 1);
        assert!(!tm.is_in_flight(&h(5)));

        let actions = tm.register(2, 10, &chain, TASK_TIMEOUT_SECS + 1);
        assert_eq!(getdata_hashes(&actions, 2), vec![h(5)]);
    }

    #[test]
    fn disconnect_requeues_outstanding_tasks() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.register(2, 10, &chain, 0);
        tm.new_tasks(1, InventoryType::Block, &[h(1), h(2)], &chain, 0);

        let actions = tm.disconnected(1, &chain, 5);
        let mut moved = getdata_hashes(&actions, 2);
        moved.sort();
        let mut expected = vec![h(1), h(2)];
        expected.sort();
        assert_eq!(moved, expected);
        assert_eq!(tm.session_count(), 1);
        assert_eq!(tm.owner(&h(1)), Some(2));
    }

    #[test]
    fn completed_hashes_are_not_refetched_until_they_expire() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.new_tasks(1, InventoryType::Tx, &[h(1)], &chain, 0);
        tm.completed(Some(1), &h(1), &chain, 1);

        assert!(tm.new_tasks(1, InventoryType::Tx, &[h(1)], &chain, 2).is_empty());
        tm.on_timer(&chain, 1 + KNOWN_HASH_TTL_SECS);
        let again = tm.new_tasks(1, InventoryType::Tx, &[h(1)], &chain, 2 + KNOWN_HASH_TTL_SECS);
        assert_eq!(getdata_hashes(&again, 1), vec![h(1)]);
    }

    #[test]
    fn restart_forgets_knowledge() {
        let chain = synced();
        let mut tm = TaskManager::new();
        tm.register(1, 10, &chain, 0);
        tm.completed(None, &h(9), &chain, 0);
        let actions = tm.restart(InventoryType::Tx, &[h(9)], &chain, 1);
        assert_eq!(getdata_hashes(&actions, 1), vec![h(9)]);
    }

    #[test]
    fn headers_are_requested_before_blocks_and_only_once() {
        let chain = ChainView {
            height: 3,
            header_height: 3,
            current_block_hash: h(3),
            current_header_hash: h(3),
        };
        let mut tm = TaskManager::new();
        assert_eq!(
            tm.register(1, 20, &chain, 0),
            vec![TaskAction::SendGetHeaders {
                session: 1,
                start: h(3)
            }]
        );
        // The header task is taken and block sync waits for it.
        assert!(tm.register(2, 20, &chain, 0).is_empty());

        let caught_up = ChainView {
            header_height: 20,
            current_header_hash: h(20),
            ..chain
        };
        let actions = tm.header_task_completed(1, &caught_up, 1);
        assert!(!tm.has_header_task());
        assert_eq!(
            actions,
            vec![
                TaskAction::SendGetBlocks {
                    session: 1,
                    start: h(3)
                },
                TaskAction::SendGetBlocks {
                    session: 2,
                    start: h(3)
                },
            ]
        );
    }

    #[test]
    fn announced_blocks_wait_for_header_sync() {
        let behind = ChainView {
            height: 3,
            header_height: 3,
            current_block_hash: h(3),
            current_header_hash: h(3),
        };
        let mut tm = TaskManager::new();
        tm.register(1, 20, &behind, 0);
        tm.register(2, 20, &behind, 0);

        // Blocks announced while headers are behind are held back even on
        // a session with nothing in flight.
        assert!(tm
            .new_tasks(2, InventoryType::Block, &[h(4), h(5)], &behind, 0)
            .is_empty());
        assert!(!tm.is_in_flight(&h(4)));

        // Transactions are not held back.
        let actions = tm.new_tasks(2, InventoryType::Tx, &[h(60)], &behind, 0);
        assert_eq!(getdata_hashes(&actions, 2), vec![h(60)]);
        tm.completed(Some(2), &h(60), &behind, 1);

        let caught_up = ChainView {
            header_height: 20,
            current_header_hash: h(20),
            ..behind
        };
        let actions = tm.header_task_completed(1, &caught_up, 2);
        assert_eq!(getdata_hashes(&actions, 2), vec![h(4), h(5)]);
        assert_eq!(tm.owner(&h(5)), Some(2));
    }

    #[test]
    fn header_task_is_released_by_disconnect() {
        let behind = ChainView {
            height: 0,
            header_height: 0,
            current_block_hash: h(0),
            current_header_hash: h(0),
        };
        let mut tm = TaskManager::new();
        tm.register(1, 5, &behind, 0);
        assert!(tm.has_header_task());
        tm.register(2, 5, &behind, 0);
        let actions = tm.disconnected(1, &behind, 1);
        assert!(actions.contains(&TaskAction::SendGetHeaders {
            session: 2,
            start: h(0)
        }));
    }
}
