use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted value: {0}")]
    Corruption(String),

    #[error("database is closed")]
    Closed,
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Heed(e.to_string())
    }
}

impl From<LmdbError> for ess_store::StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::Closed => ess_store::StoreError::Closed,
            LmdbError::Corruption(msg) => ess_store::StoreError::Corruption(msg),
            other => ess_store::StoreError::Backend(other.to_string()),
        }
    }
}
