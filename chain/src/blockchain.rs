//! The canonical chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use ess_consensus::{ChainHeaderReader, ConsensusEngine};
use ess_store::ChainDatabase;
use ess_types::{Block, ChainConfig, Hash, Header, Receipt, Transaction};

use crate::ChainError;

/// Chain-head notifications buffered per subscriber.
const HEAD_EVENT_CAPACITY: usize = 256;

/// Trie caching and pruning settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Keep every trie node (archive mode).
    pub disabled: bool,
    /// Memory allowance (MB) for cached trie nodes.
    pub trie_node_limit: usize,
    /// Time after which in-memory trie nodes are flushed.
    pub trie_time_limit: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            trie_node_limit: 256,
            trie_time_limit: Duration::from_secs(5 * 60),
        }
    }
}

/// Execution settings handed to block processing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmConfig {
    pub enable_preimage_recording: bool,
}

/// Posted whenever the canonical head changes.
#[derive(Clone, Debug)]
pub struct ChainHeadEvent {
    pub header: Header,
}

pub(crate) fn write_block(
    db: &dyn ChainDatabase,
    block: &Block,
    receipts: &[Receipt],
) -> Result<(), ChainError> {
    let hash = block.hash();
    db.put_header(&hash, block.number(), &block.header.encode())?;
    db.put_body(&hash, &bincode::serialize(&block.transactions)?)?;
    db.put_receipts(&hash, &bincode::serialize(receipts)?)?;
    Ok(())
}

fn read_header(db: &dyn ChainDatabase, hash: &Hash) -> Result<Option<Header>, ChainError> {
    match db.get_header(hash)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// The canonical chain rooted at the stored genesis block.
pub struct BlockChain {
    db: Arc<dyn ChainDatabase>,
    cache_config: CacheConfig,
    chain_config: ChainConfig,
    engine: Arc<ConsensusEngine>,
    vm_config: VmConfig,
    genesis: Header,
    current: RwLock<Header>,
    insert_lock: Mutex<()>,
    head_tx: broadcast::Sender<ChainHeadEvent>,
    stopped: AtomicBool,
}

impl BlockChain {
    /// Load the chain from `db`. The genesis block must already be committed.
    pub fn new(
        db: Arc<dyn ChainDatabase>,
        cache_config: CacheConfig,
        chain_config: ChainConfig,
        engine: Arc<ConsensusEngine>,
        vm_config: VmConfig,
    ) -> Result<Self, ChainError> {
        let genesis_hash = db.get_canonical_hash(0)?.ok_or(ChainError::NoGenesis)?;
        let genesis = read_header(db.as_ref(), &genesis_hash)?.ok_or(ChainError::NoGenesis)?;

        let current = match db.get_head_header_hash()? {
            Some(head) => read_header(db.as_ref(), &head)?.unwrap_or_else(|| {
                tracing::warn!(%head, "head header missing, resetting to genesis");
                genesis.clone()
            }),
            None => genesis.clone(),
        };

        tracing::info!(
            number = current.number,
            hash = %current.hash(),
            archive = cache_config.disabled,
            trie_cache = cache_config.trie_node_limit,
            preimages = vm_config.enable_preimage_recording,
            "loaded most recent local header"
        );

        let (head_tx, _) = broadcast::channel(HEAD_EVENT_CAPACITY);
        Ok(Self {
            db,
            cache_config,
            chain_config,
            engine,
            vm_config,
            genesis,
            current: RwLock::new(current),
            insert_lock: Mutex::new(()),
            head_tx,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn db(&self) -> &Arc<dyn ChainDatabase> {
        &self.db
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }

    pub fn vm_config(&self) -> VmConfig {
        self.vm_config
    }

    pub fn genesis(&self) -> &Header {
        &self.genesis
    }

    pub fn current_header(&self) -> Header {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn current_block(&self) -> Result<Block, ChainError> {
        let header = self.current_header();
        let number = header.number;
        self.get_block_by_hash(&header.hash())?
            .ok_or(ChainError::UnknownBlock(number))
    }

    pub fn get_header_by_hash(&self, hash: &Hash) -> Result<Option<Header>, ChainError> {
        read_header(self.db.as_ref(), hash)
    }

    pub fn get_header_by_number(&self, number: u64) -> Result<Option<Header>, ChainError> {
        match self.db.get_canonical_hash(number)? {
            Some(hash) => self.get_header_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        let Some(header) = self.get_header_by_hash(hash)? else {
            return Ok(None);
        };
        let transactions: Vec<Transaction> = match self.db.get_body(hash)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => Vec::new(),
        };
        Ok(Some(Block {
            header,
            transactions,
        }))
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, ChainError> {
        match self.db.get_canonical_hash(number)? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn get_receipts_by_hash(&self, hash: &Hash) -> Result<Option<Vec<Receipt>>, ChainError> {
        match self.db.get_receipts(hash)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn subscribe_chain_head_events(&self) -> broadcast::Receiver<ChainHeadEvent> {
        self.head_tx.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Import blocks (with the receipts they produced) on top of the current
    /// head. Returns how many blocks were written; blocks already canonical
    /// are skipped.
    pub fn insert_chain(&self, chain: Vec<(Block, Vec<Receipt>)>) -> Result<usize, ChainError> {
        let _guard = self.insert_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0;

        for (block, receipts) in chain {
            if self.is_stopped() {
                return Err(ChainError::Stopped);
            }
            let hash = block.hash();
            let number = block.number();
            if self.db.get_canonical_hash(number)? == Some(hash) {
                continue;
            }

            let head = self.current_header();
            if block.header.parent_hash != head.hash() || number != head.number + 1 {
                if self.db.get_header_number(&block.header.parent_hash)?.is_none() {
                    return Err(ChainError::UnknownAncestor(number));
                }
                return Err(ChainError::NotOnHead {
                    number,
                    head: head.number,
                });
            }

            self.engine.verify_header(self, &block.header, true)?;

            write_block(self.db.as_ref(), &block, &receipts)?;
            self.db.put_canonical_hash(number, &hash)?;
            self.db.put_head_header_hash(&hash)?;
            *self.current.write().unwrap_or_else(|e| e.into_inner()) = block.header.clone();
            inserted += 1;

            tracing::debug!(number, %hash, txs = block.transactions.len(), "inserted new block");
            let _ = self.head_tx.send(ChainHeadEvent {
                header: block.header,
            });
        }
        Ok(inserted)
    }

    /// Rewind the canonical chain to `number`. Heads at or below `number`
    /// are left untouched.
    pub fn set_head(&self, number: u64) -> Result<(), ChainError> {
        let _guard = self.insert_lock.lock().unwrap_or_else(|e| e.into_inner());
        let head = self.current_header();
        if number >= head.number {
            return Ok(());
        }
        tracing::warn!(target = number, from = head.number, "rewinding blockchain");

        let target_hash = self
            .db
            .get_canonical_hash(number)?
            .ok_or(ChainError::UnknownBlock(number))?;
        let target = self
            .get_header_by_hash(&target_hash)?
            .ok_or(ChainError::UnknownBlock(number))?;

        for n in (number + 1)..=head.number {
            self.db.delete_canonical_hash(n)?;
        }
        self.db.put_head_header_hash(&target_hash)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = target.clone();

        let _ = self.head_tx.send(ChainHeadEvent { header: target });
        Ok(())
    }

    /// Stop accepting new blocks.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("blockchain manager stopped");
    }
}

impl ChainHeaderReader for BlockChain {
    fn config(&self) -> &ChainConfig {
        &self.chain_config
    }

    fn current_header(&self) -> Option<Header> {
        Some(BlockChain::current_header(self))
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.get_header_by_hash(hash).unwrap_or_else(|e| {
            tracing::warn!(%hash, error = %e, "failed to read header");
            None
        })
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        self.get_header_by_number(number).unwrap_or_else(|e| {
            tracing::warn!(number, error = %e, "failed to read header");
            None
        })
    }
}
