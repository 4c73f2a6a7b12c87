//! Database schema versioning.
//!
//! Tracks a monotonically increasing schema version in the meta database and
//! runs sequential migration steps to bring an older database up to date.

use crate::{LmdbEnvironment, LmdbError};

/// The schema version that the current code expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub struct Migrator;

impl Migrator {
    /// Check the stored schema version and run any needed migrations.
    ///
    /// Version 0 means a fresh database. A stored version newer than
    /// [`CURRENT_SCHEMA_VERSION`] was written by a newer node and is refused.
    pub fn run(env: &LmdbEnvironment) -> Result<(), LmdbError> {
        let current = schema_version(env)?;

        if current == CURRENT_SCHEMA_VERSION {
            tracing::info!(version = current, "database schema is up to date");
            return Ok(());
        }

        if current > CURRENT_SCHEMA_VERSION {
            return Err(LmdbError::Schema(format!(
                "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }

        for version in current..CURRENT_SCHEMA_VERSION {
            tracing::info!(from = version, to = version + 1, "running migration");
            run_migration(version, version + 1)?;
        }
        set_schema_version(env, CURRENT_SCHEMA_VERSION)?;

        tracing::info!(version = CURRENT_SCHEMA_VERSION, "migration complete");
        Ok(())
    }
}

pub fn schema_version(env: &LmdbEnvironment) -> Result<u32, LmdbError> {
    let rtxn = env.env().read_txn()?;
    match env.meta_db.get(&rtxn, SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                LmdbError::Serialization("schema_version has unexpected byte length".into())
            })?;
            Ok(u32::from_le_bytes(arr))
        }
        None => Ok(0),
    }
}

fn set_schema_version(env: &LmdbEnvironment, version: u32) -> Result<(), LmdbError> {
    let mut wtxn = env.env().write_txn()?;
    env.meta_db.put(&mut wtxn, SCHEMA_VERSION_KEY, &version.to_le_bytes())?;
    wtxn.commit()?;
    Ok(())
}

fn run_migration(from: u32, to: u32) -> Result<(), LmdbError> {
    match (from, to) {
        // Blank slate.
        (0, 1) => Ok(()),
        _ => Err(LmdbError::Schema(format!("unknown migration: {from} -> {to}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_migration_is_error() {
        assert!(run_migration(99, 100).is_err());
    }

    #[test]
    fn fresh_database_is_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 1 << 24).unwrap();
        assert_eq!(schema_version(&env).unwrap(), 0);
        Migrator::run(&env).unwrap();
        assert_eq!(schema_version(&env).unwrap(), CURRENT_SCHEMA_VERSION);
        Migrator::run(&env).unwrap();
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 1 << 24).unwrap();
        set_schema_version(&env, CURRENT_SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(Migrator::run(&env), Err(LmdbError::Schema(_))));
    }
}
