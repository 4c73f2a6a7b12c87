//! LMDB environment setup.

use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::LmdbError;

/// Default memory map size: 16 GiB of address space, grown lazily by the OS.
pub const DEFAULT_MAP_SIZE: usize = 16 * 1024 * 1024 * 1024;

const MAX_DBS: u32 = 4;

/// The LMDB environment and its database handles.
pub struct LmdbEnvironment {
    path: PathBuf,
    env: Env,
    pub(crate) data_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment in the directory `path`.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per directory by this
        // process; LMDB forbids opening the same path twice concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let data_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("data"))?;
        let meta_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), map_size, "LMDB environment opened");
        Ok(Self {
            path: path.to_path_buf(),
            env,
            data_db,
            meta_db,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
