//! Chain fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use ess_chain::{BlockChain, CacheConfig, Genesis, VmConfig};
use ess_consensus::{ConsensusEngine, Ethash};
use ess_nullables::NullStore;
use ess_types::{Block, ChainConfig, Header, Log, Receipt, Transaction};

/// A genesis-only chain on an in-memory store, sealed by the fake engine.
pub(crate) fn fake_chain() -> (Arc<NullStore>, Arc<BlockChain>) {
    let db = Arc::new(NullStore::new());
    let genesis = Genesis {
        config: Some(ChainConfig::all_forks(1)),
        ..Genesis::mainnet()
    };
    genesis.commit(db.as_ref()).unwrap();
    let chain = BlockChain::new(
        db.clone(),
        CacheConfig::default(),
        ChainConfig::all_forks(1),
        Arc::new(ConsensusEngine::Ethash(Ethash::new_faker())),
        VmConfig::default(),
    )
    .unwrap();
    (db, Arc::new(chain))
}

/// Append one block per entry of `blocks`, each carrying those transactions.
pub(crate) fn extend_chain(chain: &BlockChain, blocks: Vec<Vec<Transaction>>) {
    extend_chain_with_logs(chain, blocks.into_iter().map(|txs| (txs, Vec::new())).collect());
}

/// Append blocks whose single receipt carries `logs`.
pub(crate) fn extend_chain_with_logs(chain: &BlockChain, blocks: Vec<(Vec<Transaction>, Vec<Log>)>) {
    let mut parent = chain.current_header();
    let mut batch = Vec::new();
    for (txs, logs) in blocks {
        let receipts = if logs.is_empty() {
            Vec::new()
        } else {
            vec![Receipt::new(parent.hash(), true, 21_000, logs)]
        };
        let bloom = ess_types::Bloom::from_logs(receipts.iter().flat_map(|r| r.logs.iter()));
        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 1,
            difficulty: 1,
            bloom,
            ..Default::default()
        };
        let block = Block::new(header, txs);
        parent = block.header.clone();
        batch.push((block, receipts));
    }
    chain.insert_chain(batch).unwrap();
}
