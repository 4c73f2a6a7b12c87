use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] keel_ledger::LedgerError),

    #[error("network error: {0}")]
    Network(#[from] keel_network::NetworkError),

    #[error("consensus error: {0}")]
    Consensus(#[from] keel_consensus::ConsensusError),

    #[error("store error: {0}")]
    Store(#[from] keel_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] keel_store_lmdb::LmdbError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
