//! Bloom-bits log index.
//!
//! Every block header carries a 2048-bit bloom of the addresses and topics of
//! its logs. The index rotates those blooms by 90 degrees per *section* of
//! consecutive blocks: for each bloom bit it stores one bit vector with a bit
//! per block in the section. A log filter then only needs to fetch the few bit
//! vectors its addresses and topics map to and AND/OR them together to find
//! candidate blocks.
//!
//! - [`BloomBitsGenerator`] rotates the blooms of one section.
//! - [`BloomIndexer`] follows the chain head and writes confirmed sections.
//! - [`Matcher`] / [`MatcherSession`] evaluate a filter over a block range,
//!   fetching bit vectors through [`RetrievalRequest`]s served by a worker
//!   pool.

pub mod error;
pub mod generator;
pub mod indexer;
pub mod matcher;

pub use error::{BloomError, MatcherError};
pub use generator::BloomBitsGenerator;
pub use indexer::BloomIndexer;
pub use matcher::{BloomRequests, Matcher, MatcherSession, Retrieval, RetrievalRequest};
