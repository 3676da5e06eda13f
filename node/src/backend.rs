//! Chain, pool and log-filter access for the RPC layer of a full node.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ess_bloombits::{BloomIndexer, BloomRequests, Matcher, MatcherSession};
use ess_chain::{BlockChain, TxPool};
use ess_types::{
    Address, Block, BlockNumber, Bloom, ChainConfig, Hash, Header, Log, Receipt, Transaction,
};

use crate::bloombits;
use crate::gasprice::GasPriceOracle;
use crate::miner::Miner;
use crate::protocol::Downloader;
use crate::shutdown::ShutdownSignal;
use crate::NodeError;

/// Criteria of a log query: any of `addresses`, and for every position in
/// `topics` any of the listed hashes. Empty lists match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<Vec<Hash>>,
}

impl LogFilter {
    /// The filter as matcher input: one OR-group per criterion.
    pub fn bloom_filters(&self) -> Vec<Vec<Vec<u8>>> {
        let mut filters = Vec::with_capacity(1 + self.topics.len());
        filters.push(self.addresses.iter().map(|a| a.as_bytes().to_vec()).collect());
        for group in &self.topics {
            filters.push(group.iter().map(|t| t.as_bytes().to_vec()).collect());
        }
        filters
    }

    /// Whether a block with `bloom` may contain a matching log.
    pub fn matches_bloom(&self, bloom: &Bloom) -> bool {
        let addresses =
            self.addresses.is_empty() || self.addresses.iter().any(|a| bloom.test(a.as_bytes()));
        addresses
            && self
                .topics
                .iter()
                .all(|group| group.is_empty() || group.iter().any(|t| bloom.test(t.as_bytes())))
    }
}

pub struct ApiBackend {
    chain: Arc<BlockChain>,
    txpool: Arc<TxPool>,
    downloader: Arc<Downloader>,
    miner: Arc<Miner>,
    indexer: Arc<BloomIndexer>,
    requests: BloomRequests,
    gpo: GasPriceOracle,
    shutdown: ShutdownSignal,
}

impl ApiBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<BlockChain>,
        txpool: Arc<TxPool>,
        downloader: Arc<Downloader>,
        miner: Arc<Miner>,
        indexer: Arc<BloomIndexer>,
        requests: BloomRequests,
        gpo: GasPriceOracle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            chain,
            txpool,
            downloader,
            miner,
            indexer,
            requests,
            gpo,
            shutdown,
        }
    }

    pub fn chain_config(&self) -> &ChainConfig {
        self.chain.chain_config()
    }

    pub fn current_block(&self) -> Result<Block, NodeError> {
        Ok(self.chain.current_block()?)
    }

    /// Abort synchronisation and rewind the chain to `number`.
    pub fn set_head(&self, number: u64) -> Result<(), NodeError> {
        self.downloader.cancel();
        Ok(self.chain.set_head(number)?)
    }

    pub fn header_by_number(&self, number: BlockNumber) -> Result<Option<Header>, NodeError> {
        match number {
            BlockNumber::Pending => Ok(Some(
                self.miner
                    .pending_block()
                    .map(|b| b.header)
                    .unwrap_or_else(|| self.chain.current_header()),
            )),
            BlockNumber::Latest => Ok(Some(self.chain.current_header())),
            BlockNumber::Earliest => Ok(self.chain.get_header_by_number(0)?),
            BlockNumber::Number(n) => Ok(self.chain.get_header_by_number(n)?),
        }
    }

    pub fn header_by_hash(&self, hash: &Hash) -> Result<Option<Header>, NodeError> {
        Ok(self.chain.get_header_by_hash(hash)?)
    }

    pub fn block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, NodeError> {
        match number {
            BlockNumber::Pending => match self.miner.pending_block() {
                Some(block) => Ok(Some(block)),
                None => Ok(Some(self.chain.current_block()?)),
            },
            BlockNumber::Latest => Ok(Some(self.chain.current_block()?)),
            BlockNumber::Earliest => Ok(self.chain.get_block_by_number(0)?),
            BlockNumber::Number(n) => Ok(self.chain.get_block_by_number(n)?),
        }
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, NodeError> {
        Ok(self.chain.get_block_by_hash(hash)?)
    }

    pub fn get_receipts(&self, hash: &Hash) -> Result<Option<Vec<Receipt>>, NodeError> {
        Ok(self.chain.get_receipts_by_hash(hash)?)
    }

    /// Logs of the block with `hash`, grouped per transaction.
    pub fn get_logs(&self, hash: &Hash) -> Result<Option<Vec<Vec<Log>>>, NodeError> {
        Ok(self
            .get_receipts(hash)?
            .map(|receipts| receipts.into_iter().map(|r| r.logs).collect()))
    }

    pub fn send_tx(&self, tx: Transaction) -> Result<(), NodeError> {
        Ok(self.txpool.add_local(tx)?)
    }

    pub fn remove_tx(&self, hash: &Hash) -> Option<Transaction> {
        self.txpool.remove(hash)
    }

    pub fn pool_transactions(&self) -> Vec<Transaction> {
        self.txpool.pending().into_values().flatten().collect()
    }

    pub fn pool_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.txpool.get(hash)
    }

    pub fn pool_nonce(&self, addr: &Address) -> u64 {
        self.txpool.nonce(addr)
    }

    pub fn stats(&self) -> (usize, usize) {
        self.txpool.stats()
    }

    #[allow(clippy::type_complexity)]
    pub fn txpool_content(
        &self,
    ) -> (
        std::collections::BTreeMap<Address, Vec<Transaction>>,
        std::collections::BTreeMap<Address, Vec<Transaction>>,
    ) {
        self.txpool.content()
    }

    pub fn suggest_price(&self) -> u128 {
        self.gpo.suggest_price()
    }

    /// Section size and number of indexed sections.
    pub fn bloom_status(&self) -> (u64, u64) {
        (self.indexer.section_size(), self.indexer.sections().0)
    }

    /// Serve `session` from the shared retrieval workers.
    pub fn service_filter(&self, session: &MatcherSession) -> Vec<JoinHandle<()>> {
        bloombits::service_filter(session, self.requests.sender(), &self.shutdown)
    }

    /// Blocks in `begin..=end` whose bloom matches `filter`, ascending.
    ///
    /// Indexed sections go through a matcher session, the remaining tail is
    /// scanned header by header. Every candidate is confirmed against its
    /// header bloom.
    pub async fn filter_blocks(
        &self,
        filter: &LogFilter,
        begin: u64,
        end: u64,
    ) -> Result<Vec<u64>, NodeError> {
        let end = end.min(self.chain.current_header().number);
        if begin > end {
            return Ok(Vec::new());
        }
        let (size, sections) = self.bloom_status();
        let indexed = sections * size;
        let mut found = Vec::new();

        if begin < indexed {
            let matcher = Matcher::new(size, filter.bloom_filters());
            let (tx, mut rx) = mpsc::unbounded_channel();
            let session = matcher.start(begin, end.min(indexed - 1), tx);
            self.service_filter(&session);
            let mut candidates = Vec::new();
            while let Some(number) = rx.recv().await {
                candidates.push(number);
            }
            let error = session.error();
            session.close();
            if let Some(err) = error {
                return Err(err.into());
            }
            for number in candidates {
                if self.confirm(filter, number)? {
                    found.push(number);
                }
            }
        }

        for number in begin.max(indexed)..=end {
            if self.confirm(filter, number)? {
                found.push(number);
            }
        }
        tracing::debug!(begin, end, indexed, matches = found.len(), "filtered blocks");
        Ok(found)
    }

    fn confirm(&self, filter: &LogFilter, number: u64) -> Result<bool, NodeError> {
        Ok(self
            .chain
            .get_header_by_number(number)?
            .is_some_and(|h| filter.matches_bloom(&h.bloom)))
    }
}
