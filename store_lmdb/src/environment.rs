//! LMDB environment setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use ess_store::{ChainDatabase, StoreError};

use crate::LmdbError;

/// Number of named databases the environment is created with.
pub const DEFAULT_MAX_DBS: u32 = 16;

/// Default LMDB map size (16 GiB of address space, not allocated up front).
pub const DEFAULT_MAP_SIZE: usize = 16 * 1024 * 1024 * 1024;

/// A chain database backed by one LMDB environment.
pub struct LmdbStore {
    pub(crate) env: Arc<Env>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
    pub(crate) headers_db: Database<Bytes, Bytes>,
    pub(crate) header_numbers_db: Database<Bytes, Bytes>,
    pub(crate) bodies_db: Database<Bytes, Bytes>,
    pub(crate) receipts_db: Database<Bytes, Bytes>,
    pub(crate) canonical_db: Database<Bytes, Bytes>,
    pub(crate) chain_config_db: Database<Bytes, Bytes>,
    pub(crate) bloom_bits_db: Database<Bytes, Bytes>,
    pub(crate) section_heads_db: Database<Bytes, Bytes>,
    closed: AtomicBool,
    path: PathBuf,
}

impl LmdbStore {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: each environment path is opened once per process by the
        // opener and never concurrently mapped by another process.
        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(max_dbs)
                .map_size(map_size)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        let headers_db = env.create_database(&mut wtxn, Some("headers"))?;
        let header_numbers_db = env.create_database(&mut wtxn, Some("header_numbers"))?;
        let bodies_db = env.create_database(&mut wtxn, Some("bodies"))?;
        let receipts_db = env.create_database(&mut wtxn, Some("receipts"))?;
        let canonical_db = env.create_database(&mut wtxn, Some("canonical"))?;
        let chain_config_db = env.create_database(&mut wtxn, Some("chain_config"))?;
        let bloom_bits_db = env.create_database(&mut wtxn, Some("bloom_bits"))?;
        let section_heads_db = env.create_database(&mut wtxn, Some("section_heads"))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), "opened LMDB environment");

        Ok(Self {
            env: Arc::new(env),
            meta_db,
            headers_db,
            header_numbers_db,
            bodies_db,
            receipts_db,
            canonical_db,
            chain_config_db,
            bloom_bits_db,
            section_heads_db,
            closed: AtomicBool::new(false),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn ensure_open(&self) -> Result<(), LmdbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LmdbError::Closed);
        }
        Ok(())
    }

    pub(crate) fn put(
        &self,
        db: Database<Bytes, Bytes>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        db.put(&mut wtxn, key, value).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    pub(crate) fn get(
        &self,
        db: Database<Bytes, Bytes>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let val = db.get(&rtxn, key).map_err(LmdbError::from)?;
        Ok(val.map(|v| v.to_vec()))
    }

    pub(crate) fn delete(&self, db: Database<Bytes, Bytes>, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        db.delete(&mut wtxn, key).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

impl ChainDatabase for LmdbStore {
    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.env.force_sync().map_err(LmdbError::from)?;
        tracing::info!(path = %self.path.display(), "chain database closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
