//! P2P layer of the keel node.
//!
//! The [`LocalNode`] accepts and dials TCP connections and spawns one
//! [`Session`] per established peer. Sessions answer peer requests from the
//! ledger and route inventories to the [`TaskManagerService`], which decides
//! what to fetch from whom.

pub mod error;
pub mod hash_cache;
pub mod local_node;
pub mod peer_manager;
pub mod relay;
pub mod session;
pub mod task_manager;

pub use error::NetworkError;
pub use hash_cache::HashCache;
pub use local_node::{LocalNode, LocalNodeConfig, LocalNodeHandle, NodeCommand, NodeStats};
pub use peer_manager::{PeerLimits, PeerManager, PenaltyReason};
pub use relay::{Inventory, RelayCache, RelayResult};
pub use session::{Session, SessionCommand, SessionContext, SessionId, SessionState};
pub use task_manager::{
    ChainView, TaskAction, TaskCommand, TaskManager, TaskManagerHandle, TaskManagerService,
};
