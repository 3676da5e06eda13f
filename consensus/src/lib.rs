//! Consensus engines.
//!
//! A node runs exactly one engine for its lifetime, chosen once at startup by
//! [`create_consensus_engine`]:
//!
//! - [`Clique`]: proof-of-authority; selected whenever the chain
//!   configuration carries a clique section.
//! - [`Ethash`]: proof-of-work in one of its modes otherwise.
//!
//! Both are wrapped in the closed [`ConsensusEngine`] sum type so callers can
//! reach engine-specific capabilities (e.g. signer authorization) by matching
//! instead of by downcasting.

pub mod api;
pub mod clique;
pub mod engine;
pub mod error;
pub mod reader;
pub mod selector;

pub use api::EngineApi;
pub use clique::{Clique, SignerFn, Snapshot};
pub use engine::ConsensusEngine;
pub use error::ConsensusError;
pub use ess_ethash::{Ethash, EthashConfig, EthashMode, PowMode};
pub use reader::ChainHeaderReader;
pub use selector::{create_consensus_engine, PathResolver};
