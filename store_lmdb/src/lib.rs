//! LMDB storage backend for the Essentia node.
//!
//! Implements all storage traits from `ess-store` using the `heed` LMDB bindings.
//! Each logical store maps to one LMDB database within a single environment.

pub mod bloombits;
pub mod chain;
pub mod environment;
pub mod error;
pub mod meta;
pub mod opener;

pub use environment::LmdbStore;
pub use error::LmdbError;
pub use opener::LmdbOpener;
