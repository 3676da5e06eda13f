//! Local block production.
//!
//! The miner repeatedly builds a block on top of the canonical head from the
//! pool's pending transactions, lets the consensus engine prepare and seal
//! it, imports the sealed block and announces it on the event mux.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use ess_chain::{BlockChain, ChainError, TxPool};
use ess_consensus::{ConsensusEngine, ConsensusError};
use ess_ethash::{EthashError, MAXIMUM_EXTRA_DATA_SIZE};
use ess_types::{Address, Block, Bloom, ChainConfig, Header, Receipt};

use crate::event::{EventMux, NodeEvent};
use crate::NodeError;

/// Back-off after a sealing round that could not produce a block.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Miner {
    chain_config: ChainConfig,
    mux: Arc<EventMux>,
    engine: Arc<ConsensusEngine>,
    chain: Arc<BlockChain>,
    txpool: Arc<TxPool>,
    rng: Mutex<StdRng>,
    etherbase: RwLock<Address>,
    extra: RwLock<Vec<u8>>,
    mining: AtomicBool,
    /// Bumped on every start and stop; a loop exits once its epoch is stale.
    epoch: AtomicU64,
    abort: Mutex<Arc<AtomicBool>>,
    wake: Notify,
    pending: RwLock<Option<Block>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

enum Round {
    Mined(Block),
    Skipped,
}

impl Miner {
    pub fn new(
        chain_config: ChainConfig,
        mux: Arc<EventMux>,
        engine: Arc<ConsensusEngine>,
        chain: Arc<BlockChain>,
        txpool: Arc<TxPool>,
        rng: StdRng,
    ) -> Self {
        Self {
            chain_config,
            mux,
            engine,
            chain,
            txpool,
            rng: Mutex::new(rng),
            etherbase: RwLock::new(Address::ZERO),
            extra: RwLock::new(Vec::new()),
            mining: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            abort: Mutex::new(Arc::new(AtomicBool::new(false))),
            wake: Notify::new(),
            pending: RwLock::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    /// Start mining to `etherbase`. The flag flips immediately; the mining
    /// loop runs on a spawned task.
    pub fn start(self: &Arc<Self>, etherbase: Address) {
        self.set_etherbase(etherbase);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.mining.store(true, Ordering::Release);
        tracing::info!(%etherbase, engine = self.engine.name(), "starting mining operation");

        let handle = tokio::spawn(self.clone().run(epoch));
        if let Some(old) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }
    }

    /// Stop mining and abort the seal in progress. Idempotent.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let was_mining = self.mining.swap(false, Ordering::AcqRel);
        self.abort
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store(true, Ordering::Release);
        self.wake.notify_waiters();
        if was_mining {
            tracing::info!("mining stopped");
        }
    }

    pub fn mining(&self) -> bool {
        self.mining.load(Ordering::Acquire)
    }

    pub fn set_etherbase(&self, addr: Address) {
        *self.etherbase.write().unwrap_or_else(|e| e.into_inner()) = addr;
    }

    pub fn etherbase(&self) -> Address {
        *self.etherbase.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Extra data sealed into the next blocks.
    pub fn set_extra(&self, extra: Vec<u8>) -> Result<(), NodeError> {
        if extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(NodeError::ExtraTooLong {
                len: extra.len(),
                max: MAXIMUM_EXTRA_DATA_SIZE,
            });
        }
        *self.extra.write().unwrap_or_else(|e| e.into_inner()) = extra;
        Ok(())
    }

    pub fn extra(&self) -> Vec<u8> {
        self.extra.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The block currently being sealed, if any.
    pub fn pending_block(&self) -> Option<Block> {
        self.pending.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.mining() && self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Sleep for `delay` unless mining stops first. Returns `false` when
    /// interrupted.
    async fn pause(&self, epoch: u64, delay: Duration) -> bool {
        let woken = self.wake.notified();
        if !self.is_current(epoch) {
            return false;
        }
        tokio::select! {
            _ = woken => false,
            _ = tokio::time::sleep(delay) => self.is_current(epoch),
        }
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        while self.is_current(epoch) {
            match self.commit_new_work(epoch).await {
                Ok(Round::Mined(block)) => {
                    tracing::info!(
                        number = block.number(),
                        hash = %block.hash(),
                        txs = block.transactions.len(),
                        "successfully sealed new block"
                    );
                    self.mux.post(NodeEvent::NewMinedBlock { block });
                }
                Ok(Round::Skipped) => {}
                Err(NodeError::Consensus(ConsensusError::Ethash(EthashError::LocalSealingDisabled))) => {
                    tracing::debug!("local sealing disabled, waiting for remote work");
                    if !self.pause(epoch, RETRY_DELAY).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "block sealing failed");
                    if !self.pause(epoch, RETRY_DELAY).await {
                        break;
                    }
                }
            }
        }
        *self.pending.write().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::debug!(epoch, "mining loop exited");
    }

    /// Build, seal and import one block on the current head.
    async fn commit_new_work(&self, epoch: u64) -> Result<Round, NodeError> {
        let parent = self.chain.current_header();
        let now = unix_now();
        // At most one block per second.
        let timestamp = now.max(parent.timestamp + 1);
        if timestamp > now && !self.pause(epoch, Duration::from_secs(timestamp - now)).await {
            return Ok(Round::Skipped);
        }

        let txs: Vec<_> = self.txpool.pending().into_values().flatten().collect();
        let mut gas_used = 0u64;
        let receipts: Vec<Receipt> = txs
            .iter()
            .map(|tx| {
                gas_used = gas_used.saturating_add(tx.gas);
                Receipt::new(tx.hash(), true, gas_used, Vec::new())
            })
            .collect();

        let mut bloom = Bloom::EMPTY;
        for receipt in &receipts {
            bloom.accrue_bloom(&receipt.bloom);
        }
        let mut header = Header {
            parent_hash: parent.hash(),
            coinbase: self.etherbase(),
            bloom,
            number: parent.number + 1,
            gas_limit: parent.gas_limit,
            gas_used,
            timestamp,
            extra: self.extra(),
            ..Default::default()
        };
        self.engine.prepare(self.chain.as_ref(), &mut header)?;

        let block = Block::new(header, txs);
        *self.pending.write().unwrap_or_else(|e| e.into_inner()) = Some(block.clone());

        let abort = Arc::new(AtomicBool::new(false));
        *self.abort.lock().unwrap_or_else(|e| e.into_inner()) = abort.clone();
        if !self.is_current(epoch) {
            return Ok(Round::Skipped);
        }

        let start_nonce: u64 = self.rng.lock().unwrap_or_else(|e| e.into_inner()).gen();
        let engine = self.engine.clone();
        let chain = self.chain.clone();
        let header = block.header.clone();
        let sealed = tokio::task::spawn_blocking(move || {
            engine.seal(chain.as_ref(), &header, start_nonce, &abort)
        })
        .await;

        let sealed = match sealed {
            Ok(Ok(header)) => header,
            Ok(Err(ConsensusError::Aborted))
            | Ok(Err(ConsensusError::Ethash(EthashError::Aborted))) => return Ok(Round::Skipped),
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => {
                tracing::error!(error = %e, "sealing task failed");
                return Ok(Round::Skipped);
            }
        };
        if !self.is_current(epoch) {
            return Ok(Round::Skipped);
        }

        let block = Block {
            header: sealed,
            transactions: block.transactions,
        };
        match self.chain.insert_chain(vec![(block.clone(), receipts)]) {
            Ok(_) => Ok(Round::Mined(block)),
            Err(ChainError::NotOnHead { .. }) => {
                tracing::debug!(number = block.number(), "chain head moved while sealing");
                Ok(Round::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_chain;
    use ess_chain::TxPoolConfig;
    use ess_consensus::Ethash;
    use ess_types::Transaction;
    use rand::SeedableRng;

    fn miner(engine: Ethash) -> (Arc<BlockChain>, Arc<TxPool>, Arc<EventMux>, Arc<Miner>) {
        let (_db, chain) = fake_chain();
        let txpool = TxPool::new(
            TxPoolConfig {
                journal: Default::default(),
                ..TxPoolConfig::default()
            },
            ChainConfig::all_forks(1),
            chain.clone(),
        );
        let mux = Arc::new(EventMux::new());
        let miner = Arc::new(Miner::new(
            ChainConfig::all_forks(1),
            mux.clone(),
            Arc::new(ConsensusEngine::Ethash(engine)),
            chain.clone(),
            txpool.clone(),
            StdRng::seed_from_u64(7),
        ));
        (chain, txpool, mux, miner)
    }

    #[test]
    fn oversized_extra_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let (_, _, _, miner) = miner(Ethash::new_faker());
        assert!(miner.set_extra(vec![0; 32]).is_ok());
        assert!(matches!(
            miner.set_extra(vec![0; 33]),
            Err(NodeError::ExtraTooLong { len: 33, max: 32 })
        ));
        assert_eq!(miner.extra().len(), 32);
    }

    #[tokio::test]
    async fn mines_pending_transactions() {
        let (chain, txpool, mux, miner) = miner(Ethash::new_tester());
        let mut events = mux.subscribe_channel();
        let etherbase = Address::new([9; 20]);
        txpool
            .add_local(Transaction {
                from: Address::new([1; 20]),
                gas: 21_000,
                ..Default::default()
            })
            .unwrap();

        miner.start(etherbase);
        assert!(miner.mining());

        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("block mined")
            .expect("mux open");
        let NodeEvent::NewMinedBlock { block } = event else {
            panic!("unexpected event {event:?}");
        };
        miner.stop();
        assert!(!miner.mining());

        assert_eq!(block.number(), 1);
        assert_eq!(block.header.coinbase, etherbase);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(chain.get_header_by_number(1).unwrap(), Some(block.header));
    }

    #[tokio::test]
    async fn disabled_local_sealing_mines_nothing() {
        let engine = Ethash::new_tester();
        engine.set_threads(-1);
        let (chain, _, _, miner) = miner(engine);

        miner.start(Address::new([9; 20]));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(miner.mining());
        miner.stop();
        assert_eq!(chain.current_header().number, 0);
    }
}
