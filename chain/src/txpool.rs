//! Transaction pool.
//!
//! Holds transactions waiting to be included in a block. Remote transactions
//! must pay at least the configured price floor; local ones are exempt and
//! are written to an on-disk journal so they survive restarts. Per account,
//! transactions with consecutive nonces starting at the account's next nonce
//! are *pending* (executable), the rest are *queued*.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use ess_types::{Address, ChainConfig, Hash, Header, Transaction};

use crate::{BlockChain, ChainHeadEvent, TxPoolError};

const NEW_TXS_CAPACITY: usize = 4096;

/// Transaction pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPoolConfig {
    /// Journal of local transactions, relative to the data directory. Empty
    /// disables journaling.
    #[serde(default = "default_journal")]
    pub journal: PathBuf,

    /// Interval between journal rewrites.
    #[serde(default = "default_rejournal_secs")]
    pub rejournal_secs: u64,

    /// Minimum gas price for remote transactions.
    #[serde(default = "default_price_limit")]
    pub price_limit: u64,

    /// Transactions one account may hold in the pool.
    #[serde(default = "default_account_slots")]
    pub account_slots: usize,

    /// Transactions the pool may hold in total.
    #[serde(default = "default_global_slots")]
    pub global_slots: usize,
}

fn default_journal() -> PathBuf {
    PathBuf::from("transactions.journal")
}

fn default_rejournal_secs() -> u64 {
    3600
}

fn default_price_limit() -> u64 {
    1
}

fn default_account_slots() -> usize {
    16
}

fn default_global_slots() -> usize {
    4096
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            journal: default_journal(),
            rejournal_secs: default_rejournal_secs(),
            price_limit: default_price_limit(),
            account_slots: default_account_slots(),
            global_slots: default_global_slots(),
        }
    }
}

/// Posted when transactions enter the pool.
#[derive(Clone, Debug)]
pub struct NewTxsEvent {
    pub txs: Vec<Transaction>,
}

#[derive(Default)]
struct PoolState {
    all: HashMap<Hash, Transaction>,
    accounts: HashMap<Address, BTreeMap<u64, Hash>>,
    locals: HashSet<Hash>,
    /// Next nonce per account as seen in imported blocks.
    confirmed: HashMap<Address, u64>,
}

impl PoolState {
    fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.all.remove(hash)?;
        self.locals.remove(hash);
        if let Some(list) = self.accounts.get_mut(&tx.from) {
            list.remove(&tx.nonce);
            if list.is_empty() {
                self.accounts.remove(&tx.from);
            }
        }
        Some(tx)
    }

    /// Split one account's transactions into (pending, queued).
    fn split(&self, from: &Address) -> (Vec<Transaction>, Vec<Transaction>) {
        let Some(list) = self.accounts.get(from) else {
            return (Vec::new(), Vec::new());
        };
        let mut next = self
            .confirmed
            .get(from)
            .copied()
            .or_else(|| list.keys().next().copied())
            .unwrap_or(0);
        let mut pending = Vec::new();
        let mut queued = Vec::new();
        for (nonce, hash) in list {
            let tx = self.all[hash].clone();
            if *nonce == next && queued.is_empty() {
                pending.push(tx);
                next += 1;
            } else {
                queued.push(tx);
            }
        }
        (pending, queued)
    }
}

pub struct TxPool {
    config: TxPoolConfig,
    chain_config: ChainConfig,
    chain: Arc<BlockChain>,
    state: Mutex<PoolState>,
    gas_price: RwLock<u128>,
    new_txs: broadcast::Sender<NewTxsEvent>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl TxPool {
    /// Create the pool, load the journal and start the maintenance loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: TxPoolConfig, chain_config: ChainConfig, chain: Arc<BlockChain>) -> Arc<Self> {
        let (new_txs, _) = broadcast::channel(NEW_TXS_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        let pool = Arc::new(Self {
            gas_price: RwLock::new(u128::from(config.price_limit)),
            config,
            chain_config,
            chain,
            state: Mutex::new(PoolState::default()),
            new_txs,
            stopped: AtomicBool::new(false),
            stop_tx,
        });

        if let Some(path) = pool.journal_path() {
            match pool.load_journal(path) {
                Ok((loaded, dropped)) => {
                    tracing::info!(transactions = loaded, dropped, "loaded local transaction journal")
                }
                Err(e) => tracing::warn!(error = %e, "failed to load transaction journal"),
            }
        }

        let heads = pool.chain.subscribe_chain_head_events();
        let stop_rx = pool.stop_tx.subscribe();
        let rejournal = Duration::from_secs(pool.config.rejournal_secs.max(1));
        tokio::spawn(Self::run(Arc::downgrade(&pool), heads, stop_rx, rejournal));
        pool
    }

    async fn run(
        pool: Weak<TxPool>,
        mut heads: broadcast::Receiver<ChainHeadEvent>,
        mut stop_rx: watch::Receiver<bool>,
        rejournal: Duration,
    ) {
        let mut ticker = tokio::time::interval(rejournal);
        ticker.tick().await;

        loop {
            tokio::select! {
                ev = heads.recv() => match ev {
                    Ok(ev) => match pool.upgrade() {
                        Some(p) => p.reset(&ev.header),
                        None => return,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "transaction pool lagged behind chain head");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = ticker.tick() => {
                    let Some(p) = pool.upgrade() else { return };
                    if let Some(path) = p.journal_path() {
                        if let Err(e) = p.save_journal(path) {
                            tracing::warn!(error = %e, "failed to rotate transaction journal");
                        }
                    }
                }
                _ = stop_rx.changed() => return,
            }
        }
    }

    fn journal_path(&self) -> Option<&Path> {
        let path = self.config.journal.as_path();
        (!path.as_os_str().is_empty()).then_some(path)
    }

    pub fn config(&self) -> &TxPoolConfig {
        &self.config
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn gas_price(&self) -> u128 {
        *self.gas_price.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise or lower the price floor, evicting remote transactions below it.
    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.write().unwrap_or_else(|e| e.into_inner()) = price;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let cheap: Vec<Hash> = state
            .all
            .iter()
            .filter(|(hash, tx)| tx.gas_price < price && !state.locals.contains(*hash))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &cheap {
            state.remove(hash);
        }
        tracing::info!(price, evicted = cheap.len(), "transaction pool price threshold updated");
    }

    pub fn subscribe_new_txs(&self) -> broadcast::Receiver<NewTxsEvent> {
        self.new_txs.subscribe()
    }

    /// Add a locally submitted transaction. Exempt from the price floor and
    /// journaled.
    pub fn add_local(&self, tx: Transaction) -> Result<(), TxPoolError> {
        self.add(tx, true)
    }

    pub fn add_remote(&self, tx: Transaction) -> Result<(), TxPoolError> {
        self.add(tx, false)
    }

    pub fn add_remotes(&self, txs: Vec<Transaction>) -> Vec<Result<(), TxPoolError>> {
        txs.into_iter().map(|tx| self.add(tx, false)).collect()
    }

    fn add(&self, tx: Transaction, local: bool) -> Result<(), TxPoolError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TxPoolError::Stopped);
        }
        let hash = tx.hash();
        let limit = self.gas_price();
        if !local && tx.gas_price < limit {
            return Err(TxPoolError::Underpriced {
                price: tx.gas_price,
                limit,
            });
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.all.contains_key(&hash) {
                return Err(TxPoolError::AlreadyKnown(hash));
            }

            let existing = state
                .accounts
                .get(&tx.from)
                .and_then(|list| list.get(&tx.nonce))
                .copied();
            match existing {
                Some(old) => {
                    let old_price = state.all[&old].gas_price;
                    if tx.gas_price <= old_price {
                        return Err(TxPoolError::Underpriced {
                            price: tx.gas_price,
                            limit: old_price + 1,
                        });
                    }
                    state.remove(&old);
                }
                None => {
                    if state.all.len() >= self.config.global_slots {
                        return Err(TxPoolError::PoolFull);
                    }
                    let held = state.accounts.get(&tx.from).map_or(0, |l| l.len());
                    if held >= self.config.account_slots {
                        return Err(TxPoolError::AccountLimit(tx.from));
                    }
                }
            }

            state
                .accounts
                .entry(tx.from)
                .or_default()
                .insert(tx.nonce, hash);
            if local {
                state.locals.insert(hash);
            }
            state.all.insert(hash, tx.clone());
        }

        tracing::trace!(%hash, local, "pooled new transaction");
        let _ = self.new_txs.send(NewTxsEvent { txs: vec![tx] });
        Ok(())
    }

    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .all
            .get(hash)
            .cloned()
    }

    /// Executable transactions grouped by account, nonce-ordered.
    pub fn pending(&self) -> BTreeMap<Address, Vec<Transaction>> {
        self.content().0
    }

    /// (pending, queued) transactions grouped by account.
    #[allow(clippy::type_complexity)]
    pub fn content(
        &self,
    ) -> (
        BTreeMap<Address, Vec<Transaction>>,
        BTreeMap<Address, Vec<Transaction>>,
    ) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending = BTreeMap::new();
        let mut queued = BTreeMap::new();
        for from in state.accounts.keys() {
            let (p, q) = state.split(from);
            if !p.is_empty() {
                pending.insert(*from, p);
            }
            if !q.is_empty() {
                queued.insert(*from, q);
            }
        }
        (pending, queued)
    }

    /// Number of (pending, queued) transactions.
    pub fn stats(&self) -> (usize, usize) {
        let (pending, queued) = self.content();
        (
            pending.values().map(Vec::len).sum(),
            queued.values().map(Vec::len).sum(),
        )
    }

    /// Next nonce for `addr`, accounting for its pending transactions.
    pub fn nonce(&self, addr: &Address) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (pending, _) = state.split(addr);
        match pending.last() {
            Some(tx) => tx.nonce + 1,
            None => state.confirmed.get(addr).copied().unwrap_or(0),
        }
    }

    /// Drop transactions included in the block with header `head`.
    fn reset(&self, head: &Header) {
        let block = match self.chain.get_block_by_hash(&head.hash()) {
            Ok(Some(block)) => block,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(number = head.number, error = %e, "failed to read new head");
                return;
            }
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for tx in &block.transactions {
            let next = state.confirmed.entry(tx.from).or_insert(0);
            *next = (*next).max(tx.nonce + 1);
            let stale: Vec<Hash> = state
                .accounts
                .get(&tx.from)
                .map(|list| list.range(..=tx.nonce).map(|(_, h)| *h).collect())
                .unwrap_or_default();
            for hash in stale {
                state.remove(&hash);
            }
        }
    }

    fn load_journal(&self, path: &Path) -> Result<(usize, usize), TxPoolError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(TxPoolError::Journal(e.to_string())),
        };
        let txs: Vec<Transaction> =
            bincode::deserialize(&bytes).map_err(|e| TxPoolError::Journal(e.to_string()))?;
        let total = txs.len();
        let dropped = txs
            .into_iter()
            .map(|tx| self.add_local(tx))
            .filter(Result::is_err)
            .count();
        Ok((total - dropped, dropped))
    }

    fn save_journal(&self, path: &Path) -> Result<usize, TxPoolError> {
        let locals: Vec<Transaction> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut locals: Vec<Transaction> = state
                .locals
                .iter()
                .filter_map(|h| state.all.get(h).cloned())
                .collect();
            locals.sort_by(|a, b| (a.from, a.nonce).cmp(&(b.from, b.nonce)));
            locals
        };
        let bytes = bincode::serialize(&locals).map_err(|e| TxPoolError::Journal(e.to_string()))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| TxPoolError::Journal(e.to_string()))?;
        }
        let tmp = path.with_extension("new");
        std::fs::write(&tmp, bytes).map_err(|e| TxPoolError::Journal(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| TxPoolError::Journal(e.to_string()))?;
        tracing::debug!(transactions = locals.len(), "regenerated local transaction journal");
        Ok(locals.len())
    }

    /// Stop the pool: reject new transactions, end the maintenance loop and
    /// write the journal.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stop_tx.send(true);
        if let Some(path) = self.journal_path() {
            if let Err(e) = self.save_journal(path) {
                tracing::warn!(error = %e, "failed to write transaction journal");
            }
        }
        tracing::info!("transaction pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::tests::{child, fake_chain};
    use ess_types::Block;

    fn tx(from: u8, nonce: u64, gas_price: u128) -> Transaction {
        Transaction {
            from: Address::new([from; 20]),
            nonce,
            gas_price,
            gas: 21_000,
            ..Default::default()
        }
    }

    fn pool_with(config: TxPoolConfig) -> (Arc<BlockChain>, Arc<TxPool>) {
        let (_db, chain) = fake_chain();
        let chain = Arc::new(chain);
        let pool = TxPool::new(config, ChainConfig::all_forks(1), chain.clone());
        (chain, pool)
    }

    fn no_journal() -> TxPoolConfig {
        TxPoolConfig {
            journal: PathBuf::new(),
            ..TxPoolConfig::default()
        }
    }

    #[tokio::test]
    async fn remote_below_floor_is_rejected_local_is_not() {
        let (_chain, pool) = pool_with(TxPoolConfig {
            price_limit: 10,
            ..no_journal()
        });
        assert!(matches!(
            pool.add_remote(tx(1, 0, 5)),
            Err(TxPoolError::Underpriced { price: 5, limit: 10 })
        ));
        pool.add_local(tx(1, 0, 5)).unwrap();
        pool.add_remote(tx(2, 0, 10)).unwrap();
        assert_eq!(pool.stats(), (2, 0));
    }

    #[tokio::test]
    async fn account_and_global_slots() {
        let (_chain, pool) = pool_with(TxPoolConfig {
            account_slots: 2,
            global_slots: 3,
            ..no_journal()
        });
        pool.add_remote(tx(1, 0, 1)).unwrap();
        pool.add_remote(tx(1, 1, 1)).unwrap();
        assert!(matches!(pool.add_remote(tx(1, 2, 1)), Err(TxPoolError::AccountLimit(_))));
        pool.add_remote(tx(2, 0, 1)).unwrap();
        assert!(matches!(pool.add_remote(tx(3, 0, 1)), Err(TxPoolError::PoolFull)));
    }

    #[tokio::test]
    async fn duplicate_and_replacement() {
        let (_chain, pool) = pool_with(no_journal());
        let original = tx(1, 0, 5);
        pool.add_remote(original.clone()).unwrap();
        assert!(matches!(pool.add_remote(original.clone()), Err(TxPoolError::AlreadyKnown(_))));
        assert!(matches!(pool.add_remote(tx(1, 0, 5)), Err(TxPoolError::AlreadyKnown(_))));

        let mut cheaper = tx(1, 0, 4);
        cheaper.value = 1;
        assert!(matches!(pool.add_remote(cheaper), Err(TxPoolError::Underpriced { .. })));

        let better = tx(1, 0, 6);
        pool.add_remote(better.clone()).unwrap();
        assert!(pool.get(&original.hash()).is_none());
        assert_eq!(pool.get(&better.hash()), Some(better));
    }

    #[tokio::test]
    async fn nonce_gaps_are_queued() {
        let (_chain, pool) = pool_with(no_journal());
        pool.add_remote(tx(1, 0, 1)).unwrap();
        pool.add_remote(tx(1, 1, 1)).unwrap();
        pool.add_remote(tx(1, 3, 1)).unwrap();
        let (pending, queued) = pool.content();
        let from = Address::new([1; 20]);
        assert_eq!(pending[&from].len(), 2);
        assert_eq!(queued[&from][0].nonce, 3);
        assert_eq!(pool.nonce(&from), 2);
        assert_eq!(pool.nonce(&Address::new([9; 20])), 0);
    }

    #[tokio::test]
    async fn new_transactions_are_announced() {
        let (_chain, pool) = pool_with(no_journal());
        let mut sub = pool.subscribe_new_txs();
        pool.add_remote(tx(1, 0, 1)).unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.txs.len(), 1);
    }

    #[tokio::test]
    async fn included_transactions_leave_the_pool() {
        let (chain, pool) = pool_with(no_journal());
        let included = tx(1, 0, 1);
        pool.add_remote(included.clone()).unwrap();
        pool.add_remote(tx(1, 1, 1)).unwrap();

        let (block, receipts) = child(chain.genesis(), Vec::new());
        let block = Block::new(block.header, vec![included.clone()]);
        chain.insert_chain(vec![(block, receipts)]).unwrap();

        for _ in 0..50 {
            if pool.get(&included.hash()).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pool.get(&included.hash()).is_none());
        assert_eq!(pool.nonce(&Address::new([1; 20])), 2);
    }

    #[tokio::test]
    async fn journal_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = TxPoolConfig {
            journal: dir.path().join("transactions.journal"),
            ..TxPoolConfig::default()
        };
        let local = tx(1, 0, 0);
        {
            let (_chain, pool) = pool_with(config.clone());
            pool.add_local(local.clone()).unwrap();
            pool.add_remote(tx(2, 0, 1)).unwrap();
            pool.stop();
            assert!(matches!(pool.add_local(tx(3, 0, 1)), Err(TxPoolError::Stopped)));
        }
        let (_chain, pool) = pool_with(config);
        assert_eq!(pool.get(&local.hash()), Some(local));
        assert_eq!(pool.stats(), (1, 0));
    }

    #[tokio::test]
    async fn raising_price_evicts_cheap_remotes() {
        let (_chain, pool) = pool_with(no_journal());
        pool.add_remote(tx(1, 0, 2)).unwrap();
        pool.add_local(tx(2, 0, 2)).unwrap();
        pool.set_gas_price(5);
        assert_eq!(pool.gas_price(), 5);
        assert_eq!(pool.stats(), (1, 0));
    }

    #[test]
    fn config_defaults_from_toml() {
        let cfg: TxPoolConfig = toml::from_str("price_limit = 7").unwrap();
        assert_eq!(cfg.price_limit, 7);
        assert_eq!(cfg.account_slots, 16);
        assert_eq!(cfg.journal, PathBuf::from("transactions.journal"));
    }
}
