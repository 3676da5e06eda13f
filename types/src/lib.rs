//! Fundamental types for the Essentia node.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! addresses, hashes, log blooms, headers, blocks, transactions and receipts, plus the
//! sync mode enumeration read from node configuration.

pub mod address;
pub mod block;
pub mod bloom;
mod bytes;
pub mod chain_config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod sync;
pub mod transaction;

pub use address::Address;
pub use block::{Block, BlockNumber, Header};
pub use bloom::{Bloom, BLOOM_BIT_LENGTH, BLOOM_BYTE_LENGTH};
pub use chain_config::{ChainConfig, CliqueConfig, ConfigCompatError};
pub use error::TypesError;
pub use hash::{blake2b_256, Hash};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use sync::SyncMode;
pub use transaction::{Log, Receipt, Transaction};
