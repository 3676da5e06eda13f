use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use ess_bloombits::{BloomIndexer, BloomRequests, MatcherSession};
use ess_chain::{BlockChain, TxPool};
use ess_types::{Address, Block, BlockNumber, ChainConfig, Hash, Header, Log, Receipt, Transaction};

use super::{OdrBackend, ProofState, BLOOM_TRIE_FREQUENCY};
use crate::bloombits;
use crate::gasprice::GasPriceOracle;
use crate::protocol::Downloader;
use crate::shutdown::ShutdownSignal;
use crate::NodeError;

/// RPC backend of a light client. Headers are local, everything else is
/// retrieved on demand.
pub struct LightApiBackend<O> {
    chain: Arc<BlockChain>,
    odr: Arc<O>,
    txpool: Arc<TxPool>,
    downloader: Arc<Downloader>,
    indexer: Option<Arc<BloomIndexer>>,
    requests: BloomRequests,
    gpo: GasPriceOracle,
    shutdown: ShutdownSignal,
}

impl<O: OdrBackend> LightApiBackend<O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<BlockChain>,
        odr: Arc<O>,
        txpool: Arc<TxPool>,
        downloader: Arc<Downloader>,
        indexer: Option<Arc<BloomIndexer>>,
        requests: BloomRequests,
        gpo: GasPriceOracle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            chain,
            odr,
            txpool,
            downloader,
            indexer,
            requests,
            gpo,
            shutdown,
        }
    }

    pub fn chain_config(&self) -> &ChainConfig {
        self.chain.chain_config()
    }

    /// The head as a header-only block.
    pub fn current_block(&self) -> Block {
        Block::with_header(self.chain.current_header())
    }

    pub fn set_head(&self, number: u64) -> Result<(), NodeError> {
        self.downloader.cancel();
        Ok(self.chain.set_head(number)?)
    }

    pub fn header_by_number(&self, number: BlockNumber) -> Result<Option<Header>, NodeError> {
        match number {
            BlockNumber::Latest | BlockNumber::Pending => Ok(Some(self.chain.current_header())),
            BlockNumber::Earliest => Ok(self.chain.get_header_by_number(0)?),
            BlockNumber::Number(n) => Ok(self.chain.get_header_by_number(n)?),
        }
    }

    pub fn header_by_hash(&self, hash: &Hash) -> Result<Option<Header>, NodeError> {
        Ok(self.chain.get_header_by_hash(hash)?)
    }

    pub async fn block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, NodeError> {
        let Some(header) = self.header_by_number(number)? else {
            return Ok(None);
        };
        self.get_block(&header.hash()).await
    }

    pub async fn get_block(&self, hash: &Hash) -> Result<Option<Block>, NodeError> {
        let Some(header) = self.chain.get_header_by_hash(hash)? else {
            return Ok(None);
        };
        Ok(Some(self.odr.retrieve_block(hash, header.number).await?))
    }

    /// Receipts of a block whose header is known locally.
    pub async fn get_receipts(&self, hash: &Hash) -> Result<Option<Vec<Receipt>>, NodeError> {
        let Some(number) = self.header_number(hash)? else {
            return Ok(None);
        };
        Ok(Some(self.odr.retrieve_receipts(hash, number).await?))
    }

    pub async fn get_logs(&self, hash: &Hash) -> Result<Option<Vec<Vec<Log>>>, NodeError> {
        Ok(self
            .get_receipts(hash)
            .await?
            .map(|receipts| receipts.into_iter().map(|r| r.logs).collect()))
    }

    pub fn state_and_header_by_number(
        &self,
        number: BlockNumber,
    ) -> Result<Option<(ProofState<O>, Header)>, NodeError> {
        Ok(self
            .header_by_number(number)?
            .map(|header| (ProofState::new(header.clone(), self.odr.clone()), header)))
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

    /// Light pools keep no queue: everything counts as pending.
    pub fn stats(&self) -> (usize, usize) {
        let (pending, queued) = self.txpool.stats();
        (pending + queued, 0)
    }

    #[allow(clippy::type_complexity)]
    pub fn txpool_content(
        &self,
    ) -> (
        BTreeMap<Address, Vec<Transaction>>,
        BTreeMap<Address, Vec<Transaction>>,
    ) {
        self.txpool.content()
    }

    pub fn suggest_price(&self) -> u128 {
        self.gpo.suggest_price()
    }

    /// Bloom trie section size and count; `(0, 0)` without an indexer.
    pub fn bloom_status(&self) -> (u64, u64) {
        match &self.indexer {
            Some(indexer) => (BLOOM_TRIE_FREQUENCY, indexer.sections().0),
            None => (0, 0),
        }
    }

    pub fn service_filter(&self, session: &MatcherSession) -> Vec<JoinHandle<()>> {
        bloombits::service_filter(session, self.requests.sender(), &self.shutdown)
    }

    fn header_number(&self, hash: &Hash) -> Result<Option<u64>, NodeError> {
        Ok(self.chain.get_header_by_hash(hash)?.map(|h| h.number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloombits::BLOOM_FILTER_THREADS;
    use crate::config::GpoConfig;
    use crate::event::EventMux;
    use crate::les::{AccountState, ChainOdr, OdrError};
    use crate::shutdown::ShutdownController;
    use crate::testing::{extend_chain_with_logs, fake_chain};
    use ess_bloombits::Matcher;
    use ess_chain::TxPoolConfig;
    use ess_types::SyncMode;
    use tokio::sync::mpsc;

    fn backend(
        with_indexer: bool,
    ) -> (
        LightApiBackend<ChainOdr>,
        Arc<ChainOdr>,
        BloomRequests,
        ShutdownController,
    ) {
        let (db, chain) = fake_chain();
        extend_chain_with_logs(
            &chain,
            vec![
                (Vec::new(), Vec::new()),
                (
                    Vec::new(),
                    vec![Log {
                        address: Address::new([7; 20]),
                        ..Default::default()
                    }],
                ),
            ],
        );
        let odr = Arc::new(ChainOdr::new(chain.clone()));
        let txpool = TxPool::new(
            TxPoolConfig {
                journal: Default::default(),
                ..TxPoolConfig::default()
            },
            ChainConfig::all_forks(1),
            chain.clone(),
        );
        let mux = Arc::new(EventMux::new());
        let downloader = Arc::new(Downloader::new(SyncMode::Light, chain.clone(), mux));
        let indexer = with_indexer.then(|| Arc::new(BloomIndexer::new(db, 8, 0)));
        let requests = BloomRequests::new(8);
        let shutdown = ShutdownController::new();
        let gpo = GasPriceOracle::new(chain.clone(), &GpoConfig::default(), 3);
        let backend = LightApiBackend::new(
            chain,
            odr.clone(),
            txpool,
            downloader,
            indexer,
            requests.clone(),
            gpo,
            shutdown.subscribe(),
        );
        (backend, odr, requests, shutdown)
    }

    #[tokio::test]
    async fn reads_through_odr_for_known_headers() {
        let (backend, _, _, _) = backend(true);
        let head = backend.header_by_number(BlockNumber::Pending).unwrap().unwrap();
        assert_eq!(head.number, 2);
        assert_eq!(backend.current_block().header, head);

        let block = backend.block_by_number(BlockNumber::Number(1)).await.unwrap();
        assert_eq!(block.map(|b| b.number()), Some(1));

        let logs = backend.get_logs(&head.hash()).await.unwrap().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0][0].address, Address::new([7; 20]));

        let unknown = Hash::digest(b"unknown");
        assert!(backend.get_receipts(&unknown).await.unwrap().is_none());
        assert!(backend.get_block(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewound_blocks_are_not_served() {
        let (backend, odr, _, _) = backend(true);
        let head = backend.header_by_number(BlockNumber::Latest).unwrap().unwrap();
        backend.set_head(1).unwrap();
        assert!(matches!(
            odr.retrieve_block(&head.hash(), head.number).await,
            Err(OdrError::NotFound { what: "block", .. })
        ));
    }

    #[tokio::test]
    async fn proof_state_reads_accounts() {
        let (backend, odr, _, _) = backend(false);
        let alice = Address::new([1; 20]);
        odr.set_account(alice, AccountState { nonce: 4, balance: 100 });

        let (state, header) = backend
            .state_and_header_by_number(BlockNumber::Latest)
            .unwrap()
            .unwrap();
        assert_eq!(state.header(), &header);
        assert_eq!(state.nonce(&alice).await.unwrap(), 4);
        assert_eq!(state.balance(&alice).await.unwrap(), 100);
        assert_eq!(state.nonce(&Address::new([2; 20])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bloom_status_reports_trie_sections() {
        let (without, _, _, _) = backend(false);
        assert_eq!(without.bloom_status(), (0, 0));
        let (with, _, _, _) = backend(true);
        assert_eq!(with.bloom_status(), (BLOOM_TRIE_FREQUENCY, 0));
    }

    #[tokio::test]
    async fn service_filter_spawns_multiplexers_on_shared_channel() {
        let (backend, _, requests, shutdown) = backend(true);
        let matcher = Matcher::new(8, vec![vec![b"x".to_vec()]]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = matcher.start(0, 7, tx);

        let handles = backend.service_filter(&session);
        assert_eq!(handles.len(), BLOOM_FILTER_THREADS);

        // The retrievals land on the shared channel.
        let request = tokio::time::timeout(std::time::Duration::from_secs(5), requests.recv())
            .await
            .expect("request issued")
            .expect("channel open");
        assert_eq!(request.retrieval.sections, vec![0]);

        shutdown.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(session.is_closed());
    }
}
