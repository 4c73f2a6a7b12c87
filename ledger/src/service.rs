//! Mailbox around [`Blockchain`].
//!
//! Commands are processed strictly one at a time. Each command's queued
//! ledger events are broadcast before the next command is taken, so
//! subscribers observe `PersistCompleted` for height `h` before any effect
//! of height `h + 1`.
//!
//! Verification and commits run on tokio's blocking pool; the mailbox task
//! only awaits them, so sessions and consensus keep running on the
//! runtime's workers while a block is written.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use keel_types::{Block, Hash256, Header, Timestamp, Transaction};

use crate::blockchain::Blockchain;
use crate::event::LedgerEvent;
use crate::reader::LedgerReader;
use crate::{LedgerError, VerifyResult};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;
const EVENT_CHANNEL_CAPACITY: usize = 4096;
const REVERIFY_INTERVAL: Duration = Duration::from_secs(1);
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub enum LedgerCommand {
    SubmitBlock {
        block: Block,
        reply: Option<oneshot::Sender<VerifyResult>>,
    },
    SubmitTransaction {
        tx: Transaction,
        reply: Option<oneshot::Sender<VerifyResult>>,
    },
    SubmitHeaders {
        headers: Vec<Header>,
    },
    Import {
        blocks: Vec<Block>,
        reply: oneshot::Sender<Result<u32, LedgerError>>,
    },
    /// Verified pool transactions, highest priority first.
    VerifiedTransactions {
        reply: oneshot::Sender<Vec<Transaction>>,
    },
    /// Look up pooled transactions by hash, preserving the request order.
    PoolTransactions {
        hashes: Vec<Hash256>,
        reply: oneshot::Sender<Vec<Option<Transaction>>>,
    },
    PoolSize {
        reply: oneshot::Sender<(usize, usize)>,
    },
}

/// Cloneable client of the ledger service.
#[derive(Clone)]
pub struct LedgerHandle {
    commands: mpsc::Sender<LedgerCommand>,
    events: broadcast::Sender<LedgerEvent>,
    reader: LedgerReader,
}

impl LedgerHandle {
    pub fn reader(&self) -> &LedgerReader {
        &self.reader
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: LedgerCommand) -> Result<(), LedgerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LedgerError::Stopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T, LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| LedgerError::Stopped)
    }

    pub async fn submit_block(&self, block: Block) -> Result<VerifyResult, LedgerError> {
        self.request(|reply| LedgerCommand::SubmitBlock {
            block,
            reply: Some(reply),
        })
        .await
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<VerifyResult, LedgerError> {
        self.request(|reply| LedgerCommand::SubmitTransaction {
            tx,
            reply: Some(reply),
        })
        .await
    }

    /// Like [`submit_transaction`](Self::submit_transaction) but gives up
    /// after `timeout`.
    pub async fn submit_transaction_timeout(
        &self,
        tx: Transaction,
        timeout: Duration,
    ) -> Result<VerifyResult, LedgerError> {
        tokio::time::timeout(timeout, self.submit_transaction(tx))
            .await
            .map_err(|_| LedgerError::Timeout(timeout))?
    }

    pub async fn submit_block_timeout(
        &self,
        block: Block,
        timeout: Duration,
    ) -> Result<VerifyResult, LedgerError> {
        tokio::time::timeout(timeout, self.submit_block(block))
            .await
            .map_err(|_| LedgerError::Timeout(timeout))?
    }

    /// Queue a block without waiting for the verdict.
    pub async fn relay_block(&self, block: Block) -> Result<(), LedgerError> {
        self.send(LedgerCommand::SubmitBlock { block, reply: None })
            .await
    }

    pub async fn relay_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        self.send(LedgerCommand::SubmitTransaction { tx, reply: None })
            .await
    }

    pub async fn submit_headers(&self, headers: Vec<Header>) -> Result<(), LedgerError> {
        self.send(LedgerCommand::SubmitHeaders { headers }).await
    }

    pub async fn import(&self, blocks: Vec<Block>) -> Result<u32, LedgerError> {
        self.request(|reply| LedgerCommand::Import { blocks, reply })
            .await?
    }

    pub async fn verified_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.request(|reply| LedgerCommand::VerifiedTransactions { reply })
            .await
    }

    pub async fn pool_transactions(
        &self,
        hashes: Vec<Hash256>,
    ) -> Result<Vec<Option<Transaction>>, LedgerError> {
        self.request(|reply| LedgerCommand::PoolTransactions { hashes, reply })
            .await
    }

    /// `(verified, unverified)` pool sizes.
    pub async fn pool_size(&self) -> Result<(usize, usize), LedgerError> {
        self.request(|reply| LedgerCommand::PoolSize { reply }).await
    }
}

pub struct LedgerService {
    chain: Arc<Mutex<Blockchain>>,
    commands: mpsc::Receiver<LedgerCommand>,
    events: broadcast::Sender<LedgerEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl LedgerService {
    pub fn new(chain: Blockchain, shutdown_rx: broadcast::Receiver<()>) -> (Self, LedgerHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = LedgerHandle {
            commands: commands_tx,
            events: events.clone(),
            reader: chain.reader(),
        };
        let service = Self {
            chain: Arc::new(Mutex::new(chain)),
            commands,
            events,
            shutdown_rx,
        };
        (service, handle)
    }

    /// Run until shutdown or until the store fails.
    pub async fn run(mut self) -> Result<(), LedgerError> {
        let mut reverify = tokio::time::interval(REVERIFY_INTERVAL);
        let mut sweep = tokio::time::interval(ORPHAN_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("ledger service shutting down");
                    break;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if let Err(e) = self.handle(command).await {
                        tracing::error!(error = %e, "ledger halted");
                        self.broadcast();
                        return Err(e);
                    }
                }
                _ = reverify.tick() => {
                    self.blocking(|chain| chain.reverify_pool()).await?;
                }
                _ = sweep.tick() => {
                    self.lock().expire_orphans(Timestamp::now().as_secs());
                }
            }
            self.broadcast();
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Blockchain> {
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the chain on the blocking pool and wait for it.
    async fn blocking<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Blockchain) -> T + Send + 'static,
        T: Send + 'static,
    {
        let chain = Arc::clone(&self.chain);
        tokio::task::spawn_blocking(move || {
            let mut chain = chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut chain)
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))
    }

    async fn handle(&mut self, command: LedgerCommand) -> Result<(), LedgerError> {
        match command {
            LedgerCommand::SubmitBlock { block, reply } => {
                let result = self
                    .blocking(move |chain| {
                        let height = chain.height();
                        let result = chain.on_new_block(block)?;
                        if chain.height() > height {
                            chain.reverify_pool();
                        }
                        Ok::<_, LedgerError>(result)
                    })
                    .await??;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            LedgerCommand::SubmitTransaction { tx, reply } => {
                let result = self
                    .blocking(move |chain| chain.on_new_transaction(tx))
                    .await?;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            LedgerCommand::SubmitHeaders { headers } => {
                self.blocking(move |chain| chain.on_new_headers(&headers))
                    .await??;
            }
            LedgerCommand::Import { blocks, reply } => {
                let outcome = self.blocking(move |chain| chain.import(blocks)).await?;
                // Store failures are fatal; a rejected import is the caller's.
                let fatal = matches!(outcome, Err(LedgerError::Storage(_)));
                let _ = reply.send(outcome);
                if fatal {
                    return Err(LedgerError::Stopped);
                }
            }
            LedgerCommand::VerifiedTransactions { reply } => {
                let _ = reply.send(self.lock().mempool().verified_transactions());
            }
            LedgerCommand::PoolTransactions { hashes, reply } => {
                let chain = self.lock();
                let pool = chain.mempool();
                let found = hashes
                    .iter()
                    .map(|hash| pool.try_get(hash).cloned())
                    .collect();
                let _ = reply.send(found);
            }
            LedgerCommand::PoolSize { reply } => {
                let chain = self.lock();
                let pool = chain.mempool();
                let _ = reply.send((pool.len_verified(), pool.len_unverified()));
            }
        }
        Ok(())
    }

    fn broadcast(&mut self) {
        let events = self.lock().take_events();
        for event in events {
            tracing::trace!(event = event.name(), "ledger event");
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }
}
