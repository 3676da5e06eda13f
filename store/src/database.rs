//! The chain database handle shared by every node subsystem.

use std::sync::Arc;

use crate::{BloomBitsStore, ChainStore, MetaStore, StoreError};

/// A complete chain database.
pub trait ChainDatabase: MetaStore + ChainStore + BloomBitsStore + Send + Sync {
    /// Flush and close the database. Every later operation fails with
    /// [`StoreError::Closed`]. Closing twice is a no-op.
    fn close(&self) -> Result<(), StoreError>;

    fn is_closed(&self) -> bool;
}

/// Capability to open named databases (e.g. `"chaindata"`).
pub trait DatabaseOpener: Send + Sync {
    /// Open or create the named database. `cache_mb` and `handles` are sizing
    /// hints that backends may ignore.
    fn open_database(
        &self,
        name: &str,
        cache_mb: usize,
        handles: u32,
    ) -> Result<Arc<dyn ChainDatabase>, StoreError>;
}
