use thiserror::Error;

use ess_ethash::EthashError;
use ess_store::StoreError;
use ess_types::Address;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Ethash(#[from] EthashError),

    #[error("unknown ancestor")]
    UnknownAncestor,

    #[error("unknown block")]
    UnknownBlock,

    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    #[error("extra-data 96 byte signature suffix missing")]
    MissingSignature,

    #[error("non-checkpoint block contains extra signer list")]
    ExtraSigners,

    #[error("invalid signer list on checkpoint block")]
    InvalidCheckpointSigners,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("invalid difficulty: have {actual}, want {expected}")]
    WrongDifficulty { expected: u64, actual: u64 },

    #[error("invalid seal signature")]
    InvalidSignature,

    #[error("unauthorized signer {0}")]
    UnauthorizedSigner(Address),

    #[error("signed recently, must wait for others")]
    RecentlySigned,

    #[error("no signer authorized for sealing")]
    Unauthorized,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("sealing aborted")]
    Aborted,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
