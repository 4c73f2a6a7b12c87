//! LMDB storage backend for the keel node.
//!
//! Implements [`keel_store::Store`] over a single `heed` environment: one
//! ordered database for every ledger key (the first byte of each key is its
//! entity prefix) and a small meta database for the schema version.

pub mod environment;
pub mod error;
pub mod migration;
pub mod store;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use store::LmdbStore;
