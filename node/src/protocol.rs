//! Peer protocol manager.
//!
//! Wire handling lives in the p2p layer; the manager owns what the node
//! service needs from it: the advertised sub-protocols, the
//! accept-transactions gate, the downloader handle and the broadcast loops
//! for locally mined blocks and new pool transactions.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus::IntCounter;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use ess_chain::{BlockChain, TxPool};
use ess_consensus::ConsensusEngine;
use ess_store::ChainDatabase;
use ess_types::{ChainConfig, SyncMode, Transaction};

use crate::event::{EventMux, NodeEvent};

pub const ESS62: u32 = 62;
pub const ESS63: u32 = 63;

/// Protocol name advertised to peers.
pub const PROTOCOL_NAME: &str = "ess";

/// A devp2p-style capability advertised during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protocol {
    pub name: &'static str,
    pub version: u32,
    /// Number of message codes the protocol uses.
    pub length: u64,
}

/// Handle to the running p2p server.
pub struct ServerHandle {
    max_peers: usize,
    listening: AtomicBool,
    peers: AtomicUsize,
}

impl ServerHandle {
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            listening: AtomicBool::new(true),
            peers: AtomicUsize::new(0),
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Relaxed);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }

    pub fn set_peer_count(&self, peers: usize) {
        self.peers.store(peers, Ordering::Relaxed);
    }
}

/// Chain synchronisation progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
}

/// Block downloader handle.
pub struct Downloader {
    chain: Arc<BlockChain>,
    mux: Arc<EventMux>,
    mode: SyncMode,
    origin: AtomicU64,
    highest: AtomicU64,
    syncing: AtomicBool,
    cancels: AtomicU64,
}

impl Downloader {
    pub fn new(mode: SyncMode, chain: Arc<BlockChain>, mux: Arc<EventMux>) -> Self {
        Self {
            chain,
            mux,
            mode,
            origin: AtomicU64::new(0),
            highest: AtomicU64::new(0),
            syncing: AtomicBool::new(false),
            cancels: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> &SyncMode {
        &self.mode
    }

    pub fn progress(&self) -> SyncProgress {
        let current = self.chain.current_header().number;
        SyncProgress {
            starting_block: self.origin.load(Ordering::Relaxed),
            current_block: current,
            highest_block: self.highest.load(Ordering::Relaxed).max(current),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Record that a peer announced a chain up to `number`.
    pub fn note_peer_head(&self, number: u64) {
        let current = self.chain.current_header().number;
        if number > current && !self.syncing.swap(true, Ordering::AcqRel) {
            self.origin.store(current, Ordering::Relaxed);
            self.mux.post(NodeEvent::SyncStarted);
        }
        self.highest.fetch_max(number, Ordering::Relaxed);
    }

    /// Record that the chain caught up with the highest announced head.
    pub fn finish(&self) {
        if self.syncing.swap(false, Ordering::AcqRel) {
            self.mux.post(NodeEvent::SyncDone);
        }
    }

    /// Abort any synchronisation in flight.
    pub fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::Relaxed);
        if self.syncing.swap(false, Ordering::AcqRel) {
            tracing::info!("synchronisation cancelled");
            self.mux.post(NodeEvent::SyncFailed {
                reason: "cancelled".into(),
            });
        }
    }

    /// Number of times [`Downloader::cancel`] was called.
    pub fn cancellations(&self) -> u64 {
        self.cancels.load(Ordering::Relaxed)
    }
}

/// Counters of what the broadcast loops sent.
#[derive(Default)]
struct BroadcastStats {
    blocks: AtomicU64,
    txs: AtomicU64,
}

pub struct ProtocolManager {
    network_id: u64,
    sync_mode: SyncMode,
    chain_config: ChainConfig,
    accept_txs: Arc<AtomicBool>,
    txpool: Arc<TxPool>,
    engine: Arc<ConsensusEngine>,
    chain: Arc<BlockChain>,
    db: Arc<dyn ChainDatabase>,
    mux: Arc<EventMux>,
    downloader: Arc<Downloader>,
    max_peers: AtomicUsize,
    started: AtomicBool,
    quit: watch::Sender<bool>,
    stats: Arc<BroadcastStats>,
    dropped: Option<IntCounter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProtocolManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_config: ChainConfig,
        mut sync_mode: SyncMode,
        network_id: u64,
        mux: Arc<EventMux>,
        txpool: Arc<TxPool>,
        engine: Arc<ConsensusEngine>,
        chain: Arc<BlockChain>,
        db: Arc<dyn ChainDatabase>,
    ) -> Self {
        if sync_mode == SyncMode::Fast && chain.current_header().number > 0 {
            tracing::warn!("blockchain not empty, fast sync disabled");
            sync_mode = SyncMode::Full;
        }
        let downloader = Arc::new(Downloader::new(sync_mode.clone(), chain.clone(), mux.clone()));
        let (quit, _) = watch::channel(false);
        Self {
            network_id,
            sync_mode,
            chain_config,
            accept_txs: Arc::new(AtomicBool::new(false)),
            txpool,
            engine,
            chain,
            db,
            mux,
            downloader,
            max_peers: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            quit,
            stats: Arc::new(BroadcastStats::default()),
            dropped: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Count transactions dropped by the accept gate on `counter`.
    pub fn with_drop_counter(mut self, counter: IntCounter) -> Self {
        self.dropped = Some(counter);
        self
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn sync_mode(&self) -> &SyncMode {
        &self.sync_mode
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn chain_db(&self) -> &Arc<dyn ChainDatabase> {
        &self.db
    }

    /// Sub-protocols advertised to peers. Fast sync needs `ess/63`, so the
    /// older version is only offered in full sync.
    pub fn sub_protocols(&self) -> Vec<Protocol> {
        [ESS63, ESS62]
            .into_iter()
            .filter(|v| self.sync_mode != SyncMode::Fast || *v >= ESS63)
            .map(|version| Protocol {
                name: PROTOCOL_NAME,
                version,
                length: if version == ESS63 { 17 } else { 8 },
            })
            .collect()
    }

    /// The flag gating transaction intake. Set once the node is in sync or
    /// mining locally.
    pub fn accept_txs(&self) -> &Arc<AtomicBool> {
        &self.accept_txs
    }

    pub fn accepts_txs(&self) -> bool {
        self.accept_txs.load(Ordering::Relaxed)
    }

    /// Transactions received from a peer. Dropped while not accepting;
    /// returns how many the pool took.
    pub fn handle_transactions(&self, txs: Vec<Transaction>) -> usize {
        if !self.accepts_txs() {
            tracing::trace!(count = txs.len(), "dropping transactions, not accepting yet");
            if let Some(counter) = &self.dropped {
                counter.inc_by(txs.len() as u64);
            }
            return 0;
        }
        self.txpool
            .add_remotes(txs)
            .into_iter()
            .filter(Result::is_ok)
            .count()
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn broadcast_counts(&self) -> (u64, u64) {
        (
            self.stats.blocks.load(Ordering::Relaxed),
            self.stats.txs.load(Ordering::Relaxed),
        )
    }

    /// Start the broadcast loops with a budget of `max_peers` peers.
    pub async fn start(&self, max_peers: usize) {
        self.max_peers.store(max_peers, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);

        let mut txs = self.txpool.subscribe_new_txs();
        let mut quit = self.quit.subscribe();
        let stats = self.stats.clone();
        let tx_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.changed() => return,
                    event = txs.recv() => match event {
                        Ok(event) => {
                            stats.txs.fetch_add(event.txs.len() as u64, Ordering::Relaxed);
                            tracing::trace!(count = event.txs.len(), "broadcast transactions");
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(skipped = n, "transaction broadcast lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        let mut mined = self.mux.subscribe_channel();
        let mut quit = self.quit.subscribe();
        let stats = self.stats.clone();
        let block_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.changed() => return,
                    event = mined.recv() => match event {
                        Some(NodeEvent::NewMinedBlock { block }) => {
                            stats.blocks.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(number = block.number(), hash = %block.hash(), "propagated mined block");
                        }
                        Some(_) => {}
                        None => return,
                    },
                }
            }
        });

        self.tasks.lock().await.extend([tx_loop, block_loop]);
        tracing::info!(
            network = self.network_id,
            max_peers,
            sync = %self.sync_mode,
            head = self.chain.current_header().number,
            "protocol manager started"
        );
    }

    /// Stop the broadcast loops and cancel synchronisation.
    pub async fn stop(&self) {
        tracing::info!("stopping protocol manager");
        self.quit.send_replace(true);
        self.downloader.cancel();
        for task in self.tasks.lock().await.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "protocol task failed");
            }
        }
        self.started.store(false, Ordering::Release);
        tracing::info!("protocol manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{extend_chain, fake_chain};
    use ess_chain::TxPoolConfig;
    use ess_consensus::Ethash;
    use ess_types::Address;

    fn manager(mode: SyncMode, blocks: usize) -> ProtocolManager {
        let (db, chain) = fake_chain();
        extend_chain(&chain, vec![Vec::new(); blocks]);
        let txpool = TxPool::new(
            TxPoolConfig {
                journal: Default::default(),
                ..TxPoolConfig::default()
            },
            ChainConfig::all_forks(1),
            chain.clone(),
        );
        ProtocolManager::new(
            ChainConfig::all_forks(1),
            mode,
            7,
            Arc::new(EventMux::new()),
            txpool,
            Arc::new(ConsensusEngine::Ethash(Ethash::new_faker())),
            chain,
            db,
        )
    }

    #[tokio::test]
    async fn fast_sync_offers_only_new_protocol() {
        let pm = manager(SyncMode::Fast, 0);
        let versions: Vec<u32> = pm.sub_protocols().iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![ESS63]);

        let pm = manager(SyncMode::Full, 0);
        let versions: Vec<u32> = pm.sub_protocols().iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![ESS63, ESS62]);
    }

    #[tokio::test]
    async fn fast_sync_disabled_on_non_empty_chain() {
        let pm = manager(SyncMode::Fast, 2);
        assert_eq!(pm.sync_mode(), &SyncMode::Full);
    }

    #[tokio::test]
    async fn transactions_gated_by_accept_flag() {
        let pm = manager(SyncMode::Full, 0);
        let tx = Transaction {
            from: Address::new([3; 20]),
            gas_price: 1_000_000_000,
            ..Default::default()
        };
        assert!(!pm.accepts_txs());
        assert_eq!(pm.handle_transactions(vec![tx.clone()]), 0);

        pm.accept_txs().store(true, Ordering::Relaxed);
        assert_eq!(pm.handle_transactions(vec![tx]), 1);
    }

    #[tokio::test]
    async fn start_and_stop_broadcast_loops() {
        let pm = manager(SyncMode::Full, 0);
        pm.start(20).await;
        assert!(pm.is_started());
        assert_eq!(pm.max_peers(), 20);

        pm.stop().await;
        assert!(!pm.is_started());
        assert_eq!(pm.downloader().cancellations(), 1);
    }

    #[tokio::test]
    async fn downloader_reports_progress() {
        let (_, chain) = fake_chain();
        extend_chain(&chain, vec![Vec::new(); 3]);
        let mux = Arc::new(EventMux::new());
        let mut events = mux.subscribe_channel();
        let downloader = Downloader::new(SyncMode::Full, chain, mux);

        downloader.note_peer_head(10);
        assert!(downloader.is_syncing());
        assert_eq!(
            downloader.progress(),
            SyncProgress {
                starting_block: 3,
                current_block: 3,
                highest_block: 10
            }
        );
        assert!(matches!(events.recv().await, Some(NodeEvent::SyncStarted)));

        downloader.cancel();
        assert!(!downloader.is_syncing());
        assert!(matches!(events.recv().await, Some(NodeEvent::SyncFailed { .. })));
    }
}
