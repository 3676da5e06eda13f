//! RPC namespaces exposed by the node.
//!
//! Method dispatch and JSON marshaling belong to the RPC server; this module
//! lists what the node offers and implements the miner and net endpoints.

use std::sync::Arc;

use ess_types::Address;

use crate::node::EssNode;
use crate::protocol::ServerHandle;
use crate::NodeError;

/// Descriptor of one RPC service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Api {
    pub namespace: &'static str,
    pub version: &'static str,
    /// Name of the service implementing the namespace.
    pub service: &'static str,
    /// Whether the namespace may be exposed over public transports.
    pub public: bool,
}

impl Api {
    pub const fn public(namespace: &'static str, service: &'static str) -> Self {
        Self {
            namespace,
            version: "1.0",
            service,
            public: true,
        }
    }

    pub const fn private(namespace: &'static str, service: &'static str) -> Self {
        Self {
            namespace,
            version: "1.0",
            service,
            public: false,
        }
    }
}

/// Chain, pool and account namespaces served from the API backend.
pub(crate) const CORE_APIS: [Api; 8] = [
    Api::public("ess", "PublicEssentiaApi"),
    Api::public("ess", "PublicBlockChainApi"),
    Api::public("ess", "PublicTransactionPoolApi"),
    Api::public("txpool", "PublicTxPoolApi"),
    Api::public("debug", "PublicDebugApi"),
    Api::private("debug", "PrivateDebugApi"),
    Api::public("ess", "PublicAccountApi"),
    Api::private("personal", "PrivateAccountApi"),
];

/// Namespaces implemented by the node itself.
pub(crate) const NODE_APIS: [Api; 9] = [
    Api::public("ess", "PublicNodeApi"),
    Api::public("ess", "PublicMinerApi"),
    Api::public("ess", "PublicDownloaderApi"),
    Api::private("miner", "PrivateMinerApi"),
    Api::public("ess", "PublicFilterApi"),
    Api::private("admin", "PrivateAdminApi"),
    Api::public("debug", "PublicDebugNodeApi"),
    Api::private("debug", "PrivateDebugNodeApi"),
    Api::public("net", "PublicNetApi"),
];

/// Read-only mining status.
pub struct PublicMinerApi {
    node: Arc<EssNode>,
}

impl PublicMinerApi {
    pub fn new(node: Arc<EssNode>) -> Self {
        Self { node }
    }

    pub fn mining(&self) -> bool {
        self.node.is_mining()
    }
}

/// Control over the local miner.
pub struct PrivateMinerApi {
    node: Arc<EssNode>,
}

impl PrivateMinerApi {
    pub fn new(node: Arc<EssNode>) -> Self {
        Self { node }
    }

    /// Start mining. `threads` sets the sealing threads of proof-of-work
    /// engines: `None` uses every core, `Some(0)` disables local sealing.
    pub fn start(&self, threads: Option<i32>) -> Result<(), NodeError> {
        let threads = match threads {
            None => 0,
            Some(0) => -1,
            Some(n) => n,
        };
        self.node.engine().set_threads(threads);
        if !self.node.is_mining() {
            self.node.txpool().set_gas_price(self.node.gas_price());
            self.node.start_mining(true)?;
        }
        Ok(())
    }

    pub fn stop(&self) -> bool {
        self.node.engine().set_threads(-1);
        self.node.stop_mining();
        true
    }

    pub fn set_extra(&self, extra: &str) -> Result<bool, NodeError> {
        self.node.miner().set_extra(extra.as_bytes().to_vec())?;
        Ok(true)
    }

    pub fn set_gas_price(&self, price: u128) -> bool {
        self.node.set_gas_price(price);
        true
    }

    pub fn set_etherbase(&self, etherbase: Address) -> bool {
        self.node.set_etherbase(etherbase);
        true
    }
}

/// Network status.
pub struct PublicNetApi {
    server: Arc<ServerHandle>,
    network_id: u64,
}

impl PublicNetApi {
    pub fn new(server: Arc<ServerHandle>, network_id: u64) -> Self {
        Self { server, network_id }
    }

    pub fn listening(&self) -> bool {
        self.server.is_listening()
    }

    pub fn peer_count(&self) -> usize {
        self.server.peer_count()
    }

    pub fn version(&self) -> String {
        self.network_id.to_string()
    }
}
