//! Metadata storage trait.

use crate::StoreError;

/// Key under which the chain database schema version is stored.
pub const DATABASE_VERSION_KEY: &str = "database_version";

/// Trait for storing database metadata (schema version, indexer progress,
/// consensus snapshots, etc.).
///
/// This is a generic key-value store for internal bookkeeping that doesn't
/// belong in any domain-specific store.
pub trait MetaStore {
    /// Store a metadata value.
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Retrieve a metadata value, `None` when absent.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a metadata entry. Deleting an absent key is not an error.
    fn delete_meta(&self, key: &str) -> Result<(), StoreError>;

    /// The stored schema version, `0` when none has been written yet.
    fn get_database_version(&self) -> Result<u32, StoreError> {
        match self.get_meta(DATABASE_VERSION_KEY)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Corruption("database_version has unexpected byte length".into())
                })?;
                Ok(u32::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Record the schema version.
    fn set_database_version(&self, version: u32) -> Result<(), StoreError> {
        self.put_meta(DATABASE_VERSION_KEY, &version.to_le_bytes())
    }
}
