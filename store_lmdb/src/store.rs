//! [`Store`] implementation over the LMDB data database.

use std::path::Path;
use std::sync::{Arc, Mutex};

use heed::types::Bytes;
use heed::{Database, RoTxn};
use keel_store::{BatchOp, ReadView, Store, StoreError, WriteBatch};

use crate::migration::Migrator;
use crate::{LmdbEnvironment, LmdbError};

pub struct LmdbStore {
    env: LmdbEnvironment,
}

impl LmdbStore {
    /// Open the environment at `path` and bring its schema up to date.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        let env = LmdbEnvironment::open(path, map_size)?;
        Migrator::run(&env)?;
        Ok(Self { env })
    }

    pub fn environment(&self) -> &LmdbEnvironment {
        &self.env
    }
}

fn collect_prefix(
    db: &Database<Bytes, Bytes>,
    rtxn: &RoTxn,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, LmdbError> {
    let mut entries = Vec::new();
    for result in db.prefix_iter(rtxn, prefix)? {
        let (key, value) = result?;
        entries.push((key.to_vec(), value.to_vec()));
    }
    Ok(entries)
}

/// A read transaction held open for the lifetime of a snapshot. LMDB keeps
/// the pages it sees alive until it is dropped.
struct LmdbView {
    rtxn: Mutex<RoTxn<'static>>,
    data_db: Database<Bytes, Bytes>,
}

impl LmdbView {
    fn rtxn(&self) -> std::sync::MutexGuard<'_, RoTxn<'static>> {
        self.rtxn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReadView for LmdbView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.rtxn();
        let value = self
            .data_db
            .get(&rtxn, key)
            .map_err(LmdbError::from)?
            .map(<[u8]>::to_vec);
        Ok(value)
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(collect_prefix(&self.data_db, &self.rtxn(), prefix)?)
    }
}

impl ReadView for LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        let value = self
            .env
            .data_db
            .get(&rtxn, key)
            .map_err(LmdbError::from)?
            .map(<[u8]>::to_vec);
        Ok(value)
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        Ok(collect_prefix(&self.env.data_db, &rtxn, prefix)?)
    }
}

impl Store for LmdbStore {
    /// One LMDB write transaction per batch: dropping the transaction on an
    /// error aborts every operation already staged in it.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.len();
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.env
                        .data_db
                        .put(&mut wtxn, &key, &value)
                        .map_err(LmdbError::from)?;
                }
                BatchOp::Delete { key } => {
                    self.env
                        .data_db
                        .delete(&mut wtxn, &key)
                        .map_err(LmdbError::from)?;
                }
            }
        }
        wtxn.commit().map_err(LmdbError::from)?;
        tracing::trace!(ops, "LMDB batch committed");
        Ok(())
    }

    fn read_view(&self) -> Result<Arc<dyn ReadView>, StoreError> {
        let rtxn = self
            .env
            .env()
            .clone()
            .static_read_txn()
            .map_err(LmdbError::from)?;
        Ok(Arc::new(LmdbView {
            rtxn: Mutex::new(rtxn),
            data_db: self.env.data_db,
        }))
    }
}
