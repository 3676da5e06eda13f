//! Nullable database opener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ess_store::{ChainDatabase, DatabaseOpener, StoreError};

use crate::NullStore;

/// Hands out in-memory databases. Opening the same name twice returns the
/// same store, so a test can pre-seed a database before the node opens it.
#[derive(Default)]
pub struct NullOpener {
    stores: Mutex<HashMap<String, Arc<NullStore>>>,
}

impl NullOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `name`, created on first use.
    pub fn store(&self, name: &str) -> Arc<NullStore> {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NullStore::new()))
            .clone()
    }

    /// Names of every database opened so far.
    pub fn opened(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        names.sort();
        names
    }
}

impl DatabaseOpener for NullOpener {
    fn open_database(
        &self,
        name: &str,
        _cache_mb: usize,
        _handles: u32,
    ) -> Result<Arc<dyn ChainDatabase>, StoreError> {
        Ok(self.store(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_store::MetaStore;

    #[test]
    fn same_name_same_store() {
        let opener = NullOpener::new();
        assert!(opener.opened().is_empty());
        let seeded = opener.store("chaindata");
        seeded.set_database_version(9).unwrap();
        let db = opener.open_database("chaindata", 0, 0).unwrap();
        assert_eq!(db.get_database_version().unwrap(), 9);
        assert_eq!(opener.opened(), vec!["chaindata".to_string()]);
    }
}
