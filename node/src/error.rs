use thiserror::Error;

use ess_types::Address;

use crate::accounts::AccountError;
use crate::les::OdrError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("can't run EssNode in light sync mode, use a light client")]
    LightSyncUnsupported,

    #[error("invalid sync mode {0:?}")]
    InvalidSyncMode(String),

    #[error("Blockchain DB version mismatch ({stored} / {expected}). Run ess upgradedb.")]
    DatabaseVersionMismatch { stored: u32, expected: u32 },

    #[error("invalid peer config: light peer count ({light_peers}) >= total peer count ({max_peers})")]
    InvalidPeerConfig { light_peers: usize, max_peers: usize },

    #[error("etherbase missing: etherbase must be explicitly specified")]
    EtherbaseMissing,

    #[error("signer missing: no local account for {0}")]
    SignerMissing(Address),

    #[error("light server already attached")]
    LesServerAlreadySet,

    #[error("extra data too long: {len} > {max}")]
    ExtraTooLong { len: usize, max: usize },

    #[error("genesis error: {0}")]
    Genesis(#[from] ess_chain::GenesisError),

    #[error("chain error: {0}")]
    Chain(#[from] ess_chain::ChainError),

    #[error("transaction pool error: {0}")]
    TxPool(#[from] ess_chain::TxPoolError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ess_consensus::ConsensusError),

    #[error("store error: {0}")]
    Store(#[from] ess_store::StoreError),

    #[error("bloom index error: {0}")]
    Bloom(#[from] ess_bloombits::BloomError),

    #[error("log filter error: {0}")]
    Matcher(#[from] ess_bloombits::MatcherError),

    #[error("account error: {0}")]
    Account(#[from] AccountError),

    #[error("on-demand retrieval error: {0}")]
    Odr(#[from] OdrError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
