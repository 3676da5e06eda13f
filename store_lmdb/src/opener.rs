//! Opens named chain databases under a data directory.

use std::path::PathBuf;
use std::sync::Arc;

use ess_store::{ChainDatabase, DatabaseOpener, StoreError};

use crate::environment::{DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS};
use crate::LmdbStore;

/// Opens each named database as its own LMDB environment in
/// `<data_dir>/<name>`.
#[derive(Debug, Clone)]
pub struct LmdbOpener {
    data_dir: PathBuf,
    map_size: usize,
}

impl LmdbOpener {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            map_size: DEFAULT_MAP_SIZE,
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }
}

impl DatabaseOpener for LmdbOpener {
    fn open_database(
        &self,
        name: &str,
        cache_mb: usize,
        handles: u32,
    ) -> Result<Arc<dyn ChainDatabase>, StoreError> {
        let path = self.data_dir.join(name);
        tracing::info!(
            database = %path.display(),
            cache_mb,
            handles,
            "allocated cache and file handles"
        );
        let store = LmdbStore::open(&path, DEFAULT_MAX_DBS, self.map_size)?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_store::MetaStore;

    #[test]
    fn opens_named_database_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let opener = LmdbOpener::new(dir.path()).with_map_size(10 * 1024 * 1024);
        let db = opener.open_database("chaindata", 16, 64).unwrap();
        assert!(dir.path().join("chaindata").exists());
        assert_eq!(db.get_database_version().unwrap(), 0);
    }
}
