//! Top-level error type shared across crates.

use thiserror::Error;

/// Errors raised while parsing or decoding the fundamental types.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}
