//! Proof-of-work consensus engine.
//!
//! Sealing is a parallel nonce search: the work value of a nonce is the first
//! eight bytes (little-endian) of `blake2b(seal_hash || epoch_seed || nonce)`,
//! and a seal is valid when that value clears the header's difficulty target.

pub mod cache;
pub mod config;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod seal;

pub use cache::EpochCache;
pub use config::{EthashConfig, PowMode};
pub use difficulty::calc_difficulty;
pub use engine::{Ethash, EthashMode};
pub use error::EthashError;
pub use seal::{mix_digest, seal_hash, work_target, work_value};

/// Blocks per epoch; every epoch has its own seed.
pub const EPOCH_LENGTH: u64 = 30_000;

/// Longest `extra` field a header may carry.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;
