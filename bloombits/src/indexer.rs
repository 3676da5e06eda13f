//! Background writer of the bloom-bits index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ess_chain::{BlockChain, ChainHeadEvent};
use ess_store::ChainDatabase;
use ess_types::{Hash, Header, BLOOM_BIT_LENGTH};

use crate::matcher::closed;
use crate::{BloomBitsGenerator, BloomError};

/// Meta key under which the number of valid sections is kept.
const SECTION_COUNT_KEY: &str = "bloombits-sections";

/// Pause between two sections so indexing does not starve block import.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// Follows the canonical chain and, once a section of `section_size` blocks
/// is `confirms` blocks deep, writes its rotated bloom bits.
pub struct BloomIndexer {
    db: Arc<dyn ChainDatabase>,
    section_size: u64,
    confirms: u64,
    throttle: Duration,
    sections: watch::Sender<u64>,
    quit: watch::Sender<bool>,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BloomIndexer {
    pub fn new(db: Arc<dyn ChainDatabase>, section_size: u64, confirms: u64) -> Self {
        let stored = match db.get_meta(SECTION_COUNT_KEY) {
            Ok(Some(bytes)) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_le_bytes(buf)
            }
            Ok(_) => 0,
            Err(err) => {
                warn!(error = %err, "unreadable bloom section count, reindexing");
                0
            }
        };
        let (sections, _) = watch::channel(stored);
        let (quit, _) = watch::channel(false);
        Self {
            db,
            section_size,
            confirms,
            throttle: DEFAULT_THROTTLE,
            sections,
            quit,
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    pub fn confirms(&self) -> u64 {
        self.confirms
    }

    /// Spawn the indexing loop on the current runtime.
    pub async fn start(self: &Arc<Self>, chain: Arc<BlockChain>) {
        let heads = chain.subscribe_chain_head_events();
        let quit = self.quit.subscribe();
        let handle = tokio::spawn(Self::run(self.clone(), chain, heads, quit));
        *self.task.lock().await = Some(handle);
    }

    /// Number of complete sections, and the number and hash of the last block
    /// they cover.
    pub fn sections(&self) -> (u64, u64, Hash) {
        let count = *self.sections.borrow();
        if count == 0 {
            return (0, 0, Hash::ZERO);
        }
        let head = self
            .db
            .get_section_head(count - 1)
            .ok()
            .flatten()
            .unwrap_or(Hash::ZERO);
        (count, count * self.section_size - 1, head)
    }

    /// Watch the number of complete sections.
    pub fn subscribe_sections(&self) -> watch::Receiver<u64> {
        self.sections.subscribe()
    }

    /// The bit vector of `bit` in `section`, if the section is indexed.
    pub fn bloom_bits(&self, bit: u32, section: u64) -> Result<Option<Vec<u8>>, BloomError> {
        if bit as usize >= BLOOM_BIT_LENGTH {
            return Err(BloomError::BitOutOfRange(bit));
        }
        let Some(head) = self.db.get_section_head(section)? else {
            return Ok(None);
        };
        Ok(self.db.get_bloom_bits(bit, section, &head)?)
    }

    /// Stop the indexing loop and wait for it. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.quit.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "bloom indexer task failed");
            }
        }
        debug!("bloom indexer closed");
    }

    async fn run(
        self: Arc<Self>,
        chain: Arc<BlockChain>,
        mut heads: broadcast::Receiver<ChainHeadEvent>,
        mut quit: watch::Receiver<bool>,
    ) {
        self.update(&chain, &chain.current_header()).await;
        loop {
            tokio::select! {
                _ = closed(&mut quit) => return,
                // Queued events may be stale after a rewind; always index
                // against the live head.
                event = heads.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.update(&chain, &chain.current_header()).await
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    fn is_quitting(&self) -> bool {
        *self.quit.borrow()
    }

    fn stored_sections(&self) -> u64 {
        *self.sections.borrow()
    }

    fn set_stored_sections(&self, count: u64) -> Result<(), BloomError> {
        self.db.put_meta(SECTION_COUNT_KEY, &count.to_le_bytes())?;
        self.sections.send_replace(count);
        Ok(())
    }

    /// Bring the index in line with `head`: drop sections a reorg or rewind
    /// invalidated, then process every newly confirmed section.
    async fn update(&self, chain: &BlockChain, head: &Header) {
        if let Err(err) = self.rollback(chain, head) {
            error!(error = %err, "bloom section rollback failed");
            return;
        }
        let known = (head.number + 1).saturating_sub(self.confirms) / self.section_size;
        while self.stored_sections() < known {
            if self.is_quitting() {
                return;
            }
            let section = self.stored_sections();
            match self.process_section(chain, section) {
                Ok(last) => {
                    if let Err(err) = self.set_stored_sections(section + 1) {
                        error!(section, error = %err, "failed to record bloom section");
                        return;
                    }
                    info!(section, head = %last, "processed bloom section");
                }
                Err(err) => {
                    error!(section, error = %err, "bloom section processing failed");
                    return;
                }
            }
            if !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
        }
    }

    fn rollback(&self, chain: &BlockChain, head: &Header) -> Result<(), BloomError> {
        let stored = self.stored_sections();
        let mut count = stored;
        while count > 0 {
            let last = count * self.section_size - 1;
            if last <= head.number {
                let canonical = chain.get_header_by_number(last)?.map(|h| h.hash());
                if canonical.is_some() && canonical == self.db.get_section_head(count - 1)? {
                    break;
                }
            }
            count -= 1;
            self.db.delete_section_head(count)?;
        }
        if count != stored {
            warn!(from = stored, to = count, "rolled back bloom sections");
            self.set_stored_sections(count)?;
        }
        Ok(())
    }

    fn process_section(&self, chain: &BlockChain, section: u64) -> Result<Hash, BloomError> {
        let mut gen = BloomBitsGenerator::new(self.section_size)?;
        let mut last = Hash::ZERO;
        for i in 0..self.section_size {
            let number = section * self.section_size + i;
            let header = chain
                .get_header_by_number(number)?
                .ok_or(BloomError::MissingHeader(number))?;
            gen.add_bloom(i, &header.bloom)?;
            last = header.hash();
        }
        for bit in 0..BLOOM_BIT_LENGTH as u32 {
            self.db.put_bloom_bits(bit, section, &last, gen.bitset(bit)?)?;
        }
        self.db.put_section_head(section, &last)?;
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ess_chain::{CacheConfig, Genesis, VmConfig};
    use ess_consensus::{ConsensusEngine, Ethash};
    use ess_nullables::NullStore;
    use ess_store::BloomBitsStore;
    use ess_types::{Block, Bloom, ChainConfig};

    fn chain(db: Arc<NullStore>) -> Arc<BlockChain> {
        let genesis = Genesis {
            config: Some(ChainConfig::all_forks(1)),
            ..Genesis::mainnet()
        };
        genesis.commit(db.as_ref()).unwrap();
        Arc::new(
            BlockChain::new(
                db,
                CacheConfig::default(),
                ChainConfig::all_forks(1),
                Arc::new(ConsensusEngine::Ethash(Ethash::new_faker())),
                VmConfig::default(),
            )
            .unwrap(),
        )
    }

    fn extend(chain: &BlockChain, count: u64, tag: &[u8]) {
        let mut parent = chain.current_header();
        let mut blocks = Vec::new();
        for _ in 0..count {
            let mut bloom = Bloom::EMPTY;
            if (parent.number + 1) % 3 == 0 {
                bloom.accrue(tag);
            }
            let header = Header {
                parent_hash: parent.hash(),
                number: parent.number + 1,
                timestamp: parent.timestamp + 1,
                difficulty: 1,
                bloom,
                ..Default::default()
            };
            parent = header.clone();
            blocks.push((Block::new(header, Vec::new()), Vec::new()));
        }
        chain.insert_chain(blocks).unwrap();
    }

    async fn wait_sections(indexer: &BloomIndexer, want: u64) {
        let mut rx = indexer.subscribe_sections();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n == want))
            .await
            .expect("sections reached")
            .unwrap();
    }

    #[tokio::test]
    async fn indexes_confirmed_sections() {
        let db = Arc::new(NullStore::new());
        let chain = chain(db.clone());
        extend(&chain, 20, b"tag");

        let indexer = Arc::new(BloomIndexer::new(db.clone(), 8, 4).with_throttle(Duration::ZERO));
        indexer.start(chain.clone()).await;
        // head 20, 4 confirms: blocks 0..=16 confirmed, two full sections.
        wait_sections(&indexer, 2).await;

        let (count, last, head) = indexer.sections();
        assert_eq!((count, last), (2, 15));
        assert_eq!(head, chain.get_header_by_number(15).unwrap().unwrap().hash());

        let bit = Bloom::bit_indexes(b"tag")[0];
        // tagged blocks 3 and 6 in section 0
        assert_eq!(indexer.bloom_bits(bit, 0).unwrap(), Some(vec![0b0001_0010]));
        assert_eq!(indexer.bloom_bits(bit, 2).unwrap(), None);
        indexer.close().await;
        indexer.close().await;
    }

    #[tokio::test]
    async fn rewind_rolls_sections_back() {
        let db = Arc::new(NullStore::new());
        let chain = chain(db.clone());
        extend(&chain, 24, b"tag");

        let indexer = Arc::new(BloomIndexer::new(db.clone(), 8, 0).with_throttle(Duration::ZERO));
        indexer.start(chain.clone()).await;
        wait_sections(&indexer, 3).await;

        chain.set_head(10).unwrap();
        wait_sections(&indexer, 1).await;
        assert_eq!(db.get_section_head(1).unwrap(), None);

        extend(&chain, 14, b"other");
        wait_sections(&indexer, 3).await;
        indexer.close().await;
    }

    #[tokio::test]
    async fn section_count_survives_restart() {
        let db = Arc::new(NullStore::new());
        let chain = chain(db.clone());
        extend(&chain, 16, b"tag");

        let indexer = Arc::new(BloomIndexer::new(db.clone(), 8, 0).with_throttle(Duration::ZERO));
        indexer.start(chain.clone()).await;
        wait_sections(&indexer, 2).await;
        indexer.close().await;

        let reopened = BloomIndexer::new(db.clone(), 8, 0);
        assert_eq!(reopened.sections().0, 2);
    }

    #[test]
    fn rejects_out_of_range_bit() {
        let indexer = BloomIndexer::new(Arc::new(NullStore::new()), 8, 0);
        assert!(matches!(
            indexer.bloom_bits(4096, 0),
            Err(BloomError::BitOutOfRange(4096))
        ));
    }
}
