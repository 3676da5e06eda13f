use thiserror::Error;

#[derive(Debug, Error)]
pub enum EthashError {
    #[error("non-positive difficulty")]
    InvalidDifficulty,

    #[error("difficulty mismatch: have {actual}, want {expected}")]
    DifficultyMismatch { expected: u64, actual: u64 },

    #[error("invalid mix digest")]
    InvalidMixDigest,

    #[error("invalid proof-of-work")]
    InvalidPoW,

    #[error("extra-data too long: {len} > {max}")]
    ExtraTooLong { len: usize, max: usize },

    #[error("timestamp older than parent")]
    OlderBlockTime,

    #[error("local sealing disabled")]
    LocalSealingDisabled,

    #[error("sealing aborted")]
    Aborted,
}
