//! The Essentia full node: wires the chain, pool, protocol manager, miner and
//! bloom index together and drives their lifecycle.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;

use ess_bloombits::{BloomIndexer, BloomRequests};
use ess_chain::{setup_genesis_block, write_chain_config, BlockChain, CacheConfig, TxPool, VmConfig};
use ess_consensus::{create_consensus_engine, ConsensusEngine, PathResolver};
use ess_nullables::NullOpener;
use ess_store::{ChainDatabase, DatabaseOpener, BLOCKCHAIN_VERSION};
use ess_store_lmdb::LmdbOpener;
use ess_types::{Address, SyncMode};

use crate::accounts::{signer_fn, AccountManager};
use crate::api::{Api, PublicNetApi, CORE_APIS, NODE_APIS};
use crate::backend::ApiBackend;
use crate::bloombits::{
    start_bloom_handlers, BLOOM_BITS_BLOCKS, BLOOM_CONFIRMS, BLOOM_REQUEST_CAPACITY,
};
use crate::config::NodeConfig;
use crate::event::{EventMux, NodeEvent};
use crate::extra_data::make_extra_data;
use crate::gasprice::GasPriceOracle;
use crate::les::LesServer;
use crate::metrics::NodeMetrics;
use crate::miner::Miner;
use crate::protocol::{Downloader, Protocol, ProtocolManager, ServerHandle};
use crate::shutdown::{ShutdownController, ShutdownSignal};
use crate::NodeError;

/// Name of the chain database.
const CHAIN_DATABASE: &str = "chaindata";
/// Time allowed for the bloom retrieval workers to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What the hosting process provides to the node: where its files live, how
/// databases are opened and which accounts it may sign with.
pub struct ServiceContext {
    data_dir: Option<PathBuf>,
    opener: Arc<dyn DatabaseOpener>,
    account_manager: Arc<AccountManager>,
}

impl ServiceContext {
    pub fn new(data_dir: Option<PathBuf>, opener: Arc<dyn DatabaseOpener>) -> Self {
        Self {
            data_dir,
            opener,
            account_manager: Arc::new(AccountManager::new()),
        }
    }

    /// In-memory databases, no data directory.
    pub fn ephemeral() -> Self {
        Self::new(None, Arc::new(NullOpener::new()))
    }

    /// LMDB databases under `data_dir`.
    pub fn with_lmdb(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self::new(Some(data_dir.clone()), Arc::new(LmdbOpener::new(data_dir)))
    }

    pub fn with_account_manager(mut self, account_manager: Arc<AccountManager>) -> Self {
        self.account_manager = account_manager;
        self
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn account_manager(&self) -> &Arc<AccountManager> {
        &self.account_manager
    }

    pub fn open_database(
        &self,
        name: &str,
        cache_mb: usize,
        handles: u32,
    ) -> Result<Arc<dyn ChainDatabase>, NodeError> {
        tracing::info!(name, cache_mb, handles, "opening database");
        Ok(self.opener.open_database(name, cache_mb, handles)?)
    }
}

impl PathResolver for ServiceContext {
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.data_dir {
            Some(dir) => dir.join(path),
            None => PathBuf::new(),
        }
    }
}

/// A running full node.
pub struct EssNode {
    config: NodeConfig,

    chain_db: Arc<dyn ChainDatabase>,
    engine: Arc<ConsensusEngine>,
    blockchain: Arc<BlockChain>,
    txpool: Arc<TxPool>,
    protocol_manager: Arc<ProtocolManager>,
    miner: Arc<Miner>,
    event_mux: Arc<EventMux>,
    account_manager: Arc<AccountManager>,

    bloom_indexer: Arc<BloomIndexer>,
    bloom_requests: BloomRequests,
    bloom_handlers: Mutex<Vec<JoinHandle<()>>>,
    api_backend: Arc<ApiBackend>,

    les_server: OnceLock<Arc<dyn LesServer>>,
    net_api: OnceLock<Arc<PublicNetApi>>,

    etherbase: RwLock<Address>,
    gas_price: RwLock<u128>,

    shutdown: ShutdownController,
    metrics: Arc<NodeMetrics>,
}

impl EssNode {
    /// Open the chain database and construct every subsystem. Nothing talks
    /// to the network until [`EssNode::start`].
    pub async fn new(ctx: ServiceContext, config: NodeConfig) -> Result<Self, NodeError> {
        match &config.sync_mode {
            SyncMode::Light => return Err(NodeError::LightSyncUnsupported),
            SyncMode::Invalid(raw) => return Err(NodeError::InvalidSyncMode(raw.clone())),
            SyncMode::Full | SyncMode::Fast => {}
        }
        let metrics = Arc::new(NodeMetrics::new()?);

        let chain_db =
            ctx.open_database(CHAIN_DATABASE, config.database_cache, config.database_handles)?;
        match Self::assemble(&ctx, config, chain_db.clone(), metrics).await {
            Ok(node) => Ok(node),
            Err(e) => {
                if let Err(close) = chain_db.close() {
                    tracing::warn!(error = %close, "failed to close chain database");
                }
                Err(e)
            }
        }
    }

    async fn assemble(
        ctx: &ServiceContext,
        config: NodeConfig,
        chain_db: Arc<dyn ChainDatabase>,
        metrics: Arc<NodeMetrics>,
    ) -> Result<Self, NodeError> {
        let setup = setup_genesis_block(chain_db.as_ref(), config.genesis.as_ref())?;
        tracing::info!(
            genesis = %setup.hash,
            chain_id = setup.config.chain_id,
            clique = setup.config.clique.is_some(),
            "initialised chain configuration"
        );

        if !config.skip_bc_version_check {
            let stored = chain_db.get_database_version()?;
            if stored != 0 && stored != BLOCKCHAIN_VERSION {
                return Err(NodeError::DatabaseVersionMismatch {
                    stored,
                    expected: BLOCKCHAIN_VERSION,
                });
            }
            chain_db.set_database_version(BLOCKCHAIN_VERSION)?;
        }

        let engine =
            create_consensus_engine(ctx, &config.ethash, &setup.config, chain_db.clone());
        tracing::info!(
            engine = engine.name(),
            network = config.network_id,
            sync = %config.sync_mode,
            "initialising Essentia protocol"
        );

        let cache_config = CacheConfig {
            disabled: config.no_pruning,
            trie_node_limit: config.trie_cache,
            trie_time_limit: Duration::from_secs(config.trie_timeout_secs),
        };
        let vm_config = VmConfig {
            enable_preimage_recording: config.enable_preimage_recording,
        };
        let blockchain = Arc::new(BlockChain::new(
            chain_db.clone(),
            cache_config,
            setup.config.clone(),
            engine.clone(),
            vm_config,
        )?);

        if let Some(compat) = &setup.compat {
            tracing::warn!(error = %compat, "rewinding chain to upgrade configuration");
            blockchain.set_head(compat.rewind_to)?;
            write_chain_config(chain_db.as_ref(), &setup.hash, &setup.config)?;
        }

        let bloom_indexer = Arc::new(BloomIndexer::new(
            chain_db.clone(),
            BLOOM_BITS_BLOCKS,
            BLOOM_CONFIRMS,
        ));
        bloom_indexer.start(blockchain.clone()).await;

        let mut txpool_config = config.txpool.clone();
        if !txpool_config.journal.as_os_str().is_empty() {
            txpool_config.journal = ctx.resolve_path(&txpool_config.journal);
        }
        let txpool = TxPool::new(txpool_config, setup.config.clone(), blockchain.clone());

        let event_mux = Arc::new(EventMux::new());
        let protocol_manager = Arc::new(
            ProtocolManager::new(
                setup.config.clone(),
                config.sync_mode.clone(),
                config.network_id,
                event_mux.clone(),
                txpool.clone(),
                engine.clone(),
                blockchain.clone(),
                chain_db.clone(),
            )
            .with_drop_counter(metrics.txs_dropped.clone()),
        );

        let miner = Arc::new(Miner::new(
            setup.config.clone(),
            event_mux.clone(),
            engine.clone(),
            blockchain.clone(),
            txpool.clone(),
            StdRng::from_entropy(),
        ));
        miner.set_extra(make_extra_data(config.extra_data.as_bytes()))?;

        {
            let metrics = metrics.clone();
            event_mux.subscribe(Box::new(move |event| {
                if let NodeEvent::NewMinedBlock { block } = event {
                    metrics.blocks_mined.inc();
                    metrics.chain_head.set(block.number() as i64);
                }
            }));
        }

        let shutdown = ShutdownController::new();
        let bloom_requests = BloomRequests::new(BLOOM_REQUEST_CAPACITY);
        let gpo = GasPriceOracle::new(
            blockchain.clone(),
            &config.gpo,
            u128::from(config.gas_price),
        );
        let api_backend = Arc::new(ApiBackend::new(
            blockchain.clone(),
            txpool.clone(),
            protocol_manager.downloader().clone(),
            miner.clone(),
            bloom_indexer.clone(),
            bloom_requests.clone(),
            gpo,
            shutdown.subscribe(),
        ));

        Ok(Self {
            etherbase: RwLock::new(config.etherbase),
            gas_price: RwLock::new(u128::from(config.gas_price)),
            account_manager: ctx.account_manager.clone(),
            config,
            chain_db,
            engine,
            blockchain,
            txpool,
            protocol_manager,
            miner,
            event_mux,
            bloom_indexer,
            bloom_requests,
            bloom_handlers: Mutex::new(Vec::new()),
            api_backend,
            les_server: OnceLock::new(),
            net_api: OnceLock::new(),
            shutdown,
            metrics,
        })
    }

    /// Attach the light-serving extension. Must happen before
    /// [`EssNode::start`], at most once.
    pub fn add_les_server(&self, server: Arc<dyn LesServer>) -> Result<(), NodeError> {
        server.set_bloom_bits_indexer(self.bloom_indexer.clone());
        self.les_server
            .set(server)
            .map_err(|_| NodeError::LesServerAlreadySet)
    }

    /// Start serving the network through `server`.
    pub async fn start(&self, server: &Arc<ServerHandle>) -> Result<(), NodeError> {
        let mut max_peers = server.max_peers();
        if self.config.light_serv > 0 {
            if self.config.light_peers >= max_peers {
                return Err(NodeError::InvalidPeerConfig {
                    light_peers: self.config.light_peers,
                    max_peers,
                });
            }
            max_peers -= self.config.light_peers;
        }

        let mut handlers = start_bloom_handlers(
            self.chain_db.clone(),
            self.bloom_requests.clone(),
            self.shutdown.subscribe(),
            self.metrics.clone(),
        );

        let mut sections = self.bloom_indexer.subscribe_sections();
        let mut shutdown = self.shutdown.subscribe();
        let metrics = self.metrics.clone();
        handlers.push(tokio::spawn(async move {
            loop {
                let count = *sections.borrow_and_update();
                metrics.bloom_sections.set(count as i64);
                tokio::select! {
                    _ = shutdown.wait() => return,
                    changed = sections.changed() => if changed.is_err() { return },
                }
            }
        }));
        self.bloom_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handlers);

        let _ = self
            .net_api
            .set(Arc::new(PublicNetApi::new(server.clone(), self.config.network_id)));

        self.protocol_manager.start(max_peers).await;
        if let Some(les) = self.les_server.get() {
            les.start(server);
        }
        tracing::info!(max_peers, light = self.les_server.get().is_some(), "Essentia node started");
        Ok(())
    }

    /// Tear every subsystem down in dependency order. Each step is attempted
    /// regardless of the others.
    pub async fn stop(&self) {
        tracing::info!("Essentia node stopping");

        self.bloom_indexer.close().await;
        tracing::debug!("bloom indexer closed");

        self.blockchain.stop();

        self.protocol_manager.stop().await;

        if let Some(les) = self.les_server.get() {
            les.stop();
        }

        self.txpool.stop();

        self.miner.stop();
        self.metrics.mining.set(0);

        self.event_mux.stop();

        match self.chain_db.close() {
            Ok(()) => tracing::info!("chain database closed"),
            Err(e) => tracing::error!(error = %e, "failed to close chain database"),
        }

        self.shutdown.shutdown();

        let handlers: Vec<JoinHandle<()>> = self
            .bloom_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let wait_all = async {
            for handle in handlers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "bloom handlers still running");
        }

        tracing::info!("Essentia node stopped");
    }

    /// The mining address: the configured one, else the first account of
    /// the first wallet, which is then remembered.
    pub fn etherbase(&self) -> Result<Address, NodeError> {
        let current = *self.etherbase.read().unwrap_or_else(|e| e.into_inner());
        if !current.is_zero() {
            return Ok(current);
        }
        let first = self
            .account_manager
            .wallets()
            .first()
            .and_then(|w| w.accounts().first().copied());
        match first {
            Some(account) => {
                *self.etherbase.write().unwrap_or_else(|e| e.into_inner()) = account;
                tracing::info!(etherbase = %account, "etherbase automatically configured");
                Ok(account)
            }
            None => Err(NodeError::EtherbaseMissing),
        }
    }

    pub fn set_etherbase(&self, etherbase: Address) {
        *self.etherbase.write().unwrap_or_else(|e| e.into_inner()) = etherbase;
        self.miner.set_etherbase(etherbase);
    }

    /// Start the miner. With `local`, transactions are accepted right away
    /// instead of after synchronisation. Calling it again while mining
    /// restarts the loop with the current etherbase.
    pub fn start_mining(&self, local: bool) -> Result<(), NodeError> {
        let etherbase = self.etherbase().map_err(|e| {
            tracing::error!(error = %e, "cannot start mining without etherbase");
            e
        })?;
        if let Some(clique) = self.engine.as_clique() {
            let wallet = self.account_manager.find(&etherbase).map_err(|_| {
                tracing::error!(%etherbase, "etherbase account unavailable locally");
                NodeError::SignerMissing(etherbase)
            })?;
            clique.authorize(etherbase, signer_fn(wallet));
        }
        if local {
            self.protocol_manager.accept_txs().store(true, Ordering::Release);
        }
        self.miner.start(etherbase);
        self.metrics.mining.set(1);
        Ok(())
    }

    pub fn stop_mining(&self) {
        self.miner.stop();
        self.metrics.mining.set(0);
    }

    pub fn is_mining(&self) -> bool {
        self.miner.mining()
    }

    pub fn gas_price(&self) -> u128 {
        *self.gas_price.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Minimum gas price for mined transactions, applied to the pool.
    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.write().unwrap_or_else(|e| e.into_inner()) = price;
        self.txpool.set_gas_price(price);
    }

    /// Every RPC namespace the node offers.
    pub fn apis(&self) -> Vec<Api> {
        let mut apis = CORE_APIS.to_vec();
        apis.extend(self.engine.apis().into_iter().map(|api| Api {
            namespace: api.namespace,
            version: api.version,
            service: self.engine.name(),
            public: api.public,
        }));
        apis.extend(NODE_APIS);
        apis
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = self.protocol_manager.sub_protocols();
        if let Some(les) = self.les_server.get() {
            protocols.extend(les.protocols());
        }
        protocols
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn blockchain(&self) -> &Arc<BlockChain> {
        &self.blockchain
    }

    pub fn txpool(&self) -> &Arc<TxPool> {
        &self.txpool
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn chain_db(&self) -> &Arc<dyn ChainDatabase> {
        &self.chain_db
    }

    pub fn event_mux(&self) -> &Arc<EventMux> {
        &self.event_mux
    }

    pub fn account_manager(&self) -> &Arc<AccountManager> {
        &self.account_manager
    }

    pub fn miner(&self) -> &Arc<Miner> {
        &self.miner
    }

    pub fn protocol_manager(&self) -> &Arc<ProtocolManager> {
        &self.protocol_manager
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        self.protocol_manager.downloader()
    }

    pub fn bloom_indexer(&self) -> &Arc<BloomIndexer> {
        &self.bloom_indexer
    }

    pub fn api_backend(&self) -> &Arc<ApiBackend> {
        &self.api_backend
    }

    pub fn net_api(&self) -> Option<&Arc<PublicNetApi>> {
        self.net_api.get()
    }

    pub fn les_server(&self) -> Option<&Arc<dyn LesServer>> {
        self.les_server.get()
    }

    pub fn is_listening(&self) -> bool {
        true
    }

    pub fn ess_version(&self) -> u32 {
        self.protocol_manager
            .sub_protocols()
            .first()
            .map_or(0, |p| p.version)
    }

    pub fn net_version(&self) -> u64 {
        self.config.network_id
    }

    pub fn accept_txs(&self) -> bool {
        self.protocol_manager.accepts_txs()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_against_data_dir() {
        let ctx = ServiceContext::new(Some(PathBuf::from("/var/ess")), Arc::new(NullOpener::new()));
        assert_eq!(
            ctx.resolve_path(Path::new("ethash")),
            PathBuf::from("/var/ess/ethash")
        );
        assert_eq!(ctx.resolve_path(Path::new("/abs")), PathBuf::from("/abs"));

        let ephemeral = ServiceContext::ephemeral();
        assert!(ephemeral.data_dir().is_none());
        assert_eq!(ephemeral.resolve_path(Path::new("ethash")), PathBuf::new());
    }

    #[tokio::test]
    async fn light_sync_is_rejected_before_opening_the_database() {
        let opener = Arc::new(NullOpener::new());
        let ctx = ServiceContext::new(None, opener.clone());
        let config = NodeConfig {
            sync_mode: SyncMode::Light,
            ..NodeConfig::default()
        };
        let err = EssNode::new(ctx, config).await.err().expect("light mode rejected");
        assert!(matches!(err, NodeError::LightSyncUnsupported));
        assert!(opener.opened().is_empty());
    }
}
