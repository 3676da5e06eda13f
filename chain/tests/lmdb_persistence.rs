//! Chain state written through LMDB survives closing and reopening the
//! database.

use std::sync::Arc;

use ess_chain::{setup_genesis_block, BlockChain, CacheConfig, Genesis, VmConfig};
use ess_consensus::{ConsensusEngine, Ethash};
use ess_store::{ChainDatabase, DatabaseOpener};
use ess_store_lmdb::LmdbOpener;
use ess_types::{Block, ChainConfig, Header};

const MAP_SIZE: usize = 64 * 1024 * 1024;

fn genesis() -> Genesis {
    Genesis {
        config: Some(ChainConfig::all_forks(7)),
        nonce: 7,
        ..Genesis::mainnet()
    }
}

fn open_chain(db: Arc<dyn ChainDatabase>, config: ChainConfig) -> BlockChain {
    BlockChain::new(
        db,
        CacheConfig::default(),
        config,
        Arc::new(ConsensusEngine::Ethash(Ethash::new_faker())),
        VmConfig::default(),
    )
    .expect("chain loads")
}

fn child(parent: &Header) -> Block {
    Block::new(
        Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: parent.timestamp + 1,
            difficulty: 1,
            ..Default::default()
        },
        Vec::new(),
    )
}

#[test]
fn head_and_config_survive_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let opener = LmdbOpener::new(dir.path()).with_map_size(MAP_SIZE);

    let (genesis_hash, head) = {
        let db = opener.open_database("chaindata", 16, 16).unwrap();
        let setup = setup_genesis_block(db.as_ref(), Some(&genesis())).unwrap();
        assert!(setup.compat.is_none());
        db.set_database_version(3).unwrap();

        let chain = open_chain(db.clone(), setup.config);
        let b1 = child(chain.genesis());
        let b2 = child(&b1.header);
        let b3 = child(&b2.header);
        let head = b3.hash();
        chain
            .insert_chain(vec![(b1, Vec::new()), (b2, Vec::new()), (b3, Vec::new())])
            .unwrap();
        chain.stop();
        db.close().unwrap();
        assert!(db.is_closed());
        (setup.hash, head)
    };

    let db = opener.open_database("chaindata", 16, 16).unwrap();
    assert_eq!(db.get_database_version().unwrap(), 3);

    // No genesis given: the stored private chain config is kept.
    let setup = setup_genesis_block(db.as_ref(), None).unwrap();
    assert_eq!(setup.hash, genesis_hash);
    assert_eq!(setup.config.chain_id, 7);

    let chain = open_chain(db, setup.config);
    assert_eq!(chain.current_header().number, 3);
    assert_eq!(chain.current_header().hash(), head);
    assert_eq!(chain.get_block_by_number(2).unwrap().map(|b| b.number()), Some(2));
}
