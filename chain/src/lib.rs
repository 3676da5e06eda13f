//! Chain management for the Essentia node.
//!
//! - [`genesis`]: genesis block construction and the startup reconciliation
//!   of the stored chain configuration with the configured one.
//! - [`blockchain`]: the canonical chain: import, rewind, lookups and
//!   chain-head notifications.
//! - [`txpool`]: pending transactions with a price floor, slot limits and an
//!   on-disk journal.

pub mod blockchain;
pub mod error;
pub mod genesis;
pub mod txpool;

pub use blockchain::{BlockChain, CacheConfig, ChainHeadEvent, VmConfig};
pub use error::{ChainError, GenesisError, TxPoolError};
pub use genesis::{
    read_chain_config, setup_genesis_block, write_chain_config, Genesis, GenesisSetup,
};
pub use txpool::{NewTxsEvent, TxPool, TxPoolConfig};
