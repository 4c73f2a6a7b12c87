//! Storage abstraction for the keel node.
//!
//! Every backend (LMDB, in-memory for testing) implements [`Store`]: an
//! ordered byte-key/byte-value map with point reads, prefix scans and
//! atomic batched writes. Ledger state is never written directly; it is
//! staged in a [`Snapshot`], whose typed [`DataCache`]s overlay the store,
//! and flushed with one [`WriteBatch`] on commit.

pub mod cache;
pub mod error;
pub mod key;
pub mod prefix;
pub mod snapshot;

pub use cache::{DataCache, MetaCache, TrackState};
pub use error::StoreError;
pub use key::StoreKey;
pub use prefix::Prefix;
pub use snapshot::Snapshot;

use std::sync::Arc;

/// One write in a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A set of writes applied all-or-nothing by [`Store::write`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Read access to ordered key-value data.
pub trait ReadView: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// An ordered key-value store.
///
/// Readers never observe a partially applied batch: `write` is atomic with
/// respect to `get` and `find`.
pub trait Store: ReadView {
    /// Apply every operation of `batch` atomically.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// A frozen view of the store as of this call. Batches written
    /// afterwards are invisible to it.
    fn read_view(&self) -> Result<Arc<dyn ReadView>, StoreError>;
}
