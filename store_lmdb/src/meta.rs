//! LMDB implementation of MetaStore.

use ess_store::{MetaStore, StoreError};

use crate::LmdbStore;

impl MetaStore for LmdbStore {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.put(self.meta_db, key.as_bytes(), value)
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(self.meta_db, key.as_bytes())
    }

    fn delete_meta(&self, key: &str) -> Result<(), StoreError> {
        self.delete(self.meta_db, key.as_bytes())
    }
}
