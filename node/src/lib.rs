//! keel full node.
//!
//! [`KeelNode`] opens the ledger over LMDB and runs each component as its
//! own actor:
//! - the ledger service, owning the chain state and the memory pool
//! - the task manager, deciding what to fetch from which peer
//! - the local node, owning every peer session
//! - the dBFT consensus service
//!
//! They talk over typed channels and stop together through the
//! [`ShutdownController`].

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::KeelNode;
pub use shutdown::ShutdownController;
