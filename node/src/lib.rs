//! Essentia full node: composes the chain, transaction pool, protocol
//! manager, miner and bloom index into one service.
//!
//! [`EssNode::new`] opens the chain database and builds every subsystem;
//! [`EssNode::start`] and [`EssNode::stop`] drive their lifecycle. Mining
//! control, the etherbase and the RPC backends hang off the node.

pub mod accounts;
pub mod api;
pub mod backend;
pub mod bloombits;
pub mod config;
pub mod error;
pub mod event;
pub mod extra_data;
pub mod gasprice;
pub mod les;
pub mod logging;
pub mod metrics;
pub mod miner;
pub mod node;
pub mod protocol;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use accounts::{AccountError, AccountManager, KeyStoreWallet, Wallet};
pub use api::{Api, PrivateMinerApi, PublicMinerApi, PublicNetApi};
pub use backend::{ApiBackend, LogFilter};
pub use config::{GpoConfig, NodeConfig};
pub use error::NodeError;
pub use event::{EventMux, NodeEvent};
pub use extra_data::make_extra_data;
pub use gasprice::GasPriceOracle;
pub use les::{LesServer, LightApiBackend, LightServer};
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use miner::Miner;
pub use node::{EssNode, ServiceContext};
pub use protocol::{Downloader, Protocol, ProtocolManager, ServerHandle, SyncProgress};
pub use shutdown::{ShutdownController, ShutdownSignal};
