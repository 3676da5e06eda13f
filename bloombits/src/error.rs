use thiserror::Error;

use ess_chain::ChainError;
use ess_store::StoreError;

#[derive(Debug, Error)]
pub enum BloomError {
    #[error("section size {0} is not a positive multiple of 8")]
    InvalidSectionSize(u64),

    #[error("bloom filter with unexpected index: have {got}, want {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("bloom section already complete")]
    SectionFull,

    #[error("bloom section not yet complete")]
    SectionIncomplete,

    #[error("bloom bit {0} out of range")]
    BitOutOfRange(u32),

    #[error("missing canonical header {0}")]
    MissingHeader(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MatcherError {
    #[error("retrieval of bit {bit} section {section} failed: {reason}")]
    Retrieval { bit: u32, section: u64, reason: String },

    #[error("bit vector of bit {bit} section {section} has {len} bytes, want {expected}")]
    InvalidBitset {
        bit: u32,
        section: u64,
        len: usize,
        expected: usize,
    },

    #[error("retrieval request dropped without reply")]
    RequestDropped,

    #[error("retrieval channel closed")]
    ChannelClosed,
}
