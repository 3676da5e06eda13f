use thiserror::Error;

use ess_consensus::ConsensusError;
use ess_store::StoreError;
use ess_types::{Address, Hash};

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis has no chain configuration")]
    NoConfig,

    #[error("database contains incompatible genesis (have {stored}, new {new})")]
    Mismatch { stored: Hash, new: Hash },

    #[error("invalid stored chain configuration: {0}")]
    Json(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("blockchain is stopped")]
    Stopped,

    #[error("no genesis block in database")]
    NoGenesis,

    #[error("unknown ancestor of block {0}")]
    UnknownAncestor(u64),

    #[error("block {number} does not extend the current head {head}")]
    NotOnHead { number: u64, head: u64 },

    #[error("unknown block {0}")]
    UnknownBlock(u64),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<bincode::Error> for ChainError {
    fn from(e: bincode::Error) -> Self {
        ChainError::Codec(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TxPoolError {
    #[error("transaction pool is stopped")]
    Stopped,

    #[error("known transaction: {0}")]
    AlreadyKnown(Hash),

    #[error("transaction underpriced: {price} < {limit}")]
    Underpriced { price: u128, limit: u128 },

    #[error("account slots exhausted for {0}")]
    AccountLimit(Address),

    #[error("transaction pool is full")]
    PoolFull,

    #[error("journal error: {0}")]
    Journal(String),
}
