//! Read access to the local chain needed during header verification.

use ess_types::{ChainConfig, Hash, Header};

/// A small collection of methods engines use to access the local chain.
pub trait ChainHeaderReader: Send + Sync {
    fn config(&self) -> &ChainConfig;

    fn current_header(&self) -> Option<Header>;

    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    fn header_by_number(&self, number: u64) -> Option<Header>;
}
