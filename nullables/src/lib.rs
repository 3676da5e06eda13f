//! Nullable infrastructure for deterministic testing.
//!
//! Storage is abstracted behind the `ess-store` traits. This crate provides
//! test-friendly implementations that never touch the filesystem, so node
//! lifecycles can be driven entirely in memory (tests and `--dev` mode).

pub mod opener;
pub mod store;

pub use opener::NullOpener;
pub use store::NullStore;
