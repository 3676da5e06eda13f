//! Abstract storage traits for the Essentia node.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits and receives
//! its database as an `Arc<dyn ChainDatabase>`.

pub mod bloombits;
pub mod chain;
pub mod database;
pub mod error;
pub mod meta;

pub use bloombits::BloomBitsStore;
pub use chain::ChainStore;
pub use database::{ChainDatabase, DatabaseOpener};
pub use error::StoreError;
pub use meta::MetaStore;

/// Schema version of the chain database written by this code.
///
/// A database carrying any other non-zero version must be upgraded offline
/// before the node will open it.
pub const BLOCKCHAIN_VERSION: u32 = 3;
