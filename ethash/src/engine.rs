//! The proof-of-work engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use ess_types::{Address, Hash, Header};

use crate::cache::EpochCache;
use crate::seal::{self, mix_digest, seal_hash, work_target, work_value};
use crate::{calc_difficulty, EthashConfig, EthashError, MAXIMUM_EXTRA_DATA_SIZE};

/// Operating mode of a constructed engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EthashMode {
    Normal,
    Shared,
    Test,
    Fake,
}

static SHARED_CACHE: OnceLock<Arc<EpochCache>> = OnceLock::new();

/// Proof-of-work engine.
pub struct Ethash {
    mode: EthashMode,
    config: EthashConfig,
    cache: Arc<EpochCache>,
    threads: AtomicI32,
}

impl Ethash {
    /// A full engine. `cache_dir` must already be resolved against the data
    /// directory; an empty path disables on-disk caches.
    pub fn new(config: EthashConfig) -> Self {
        let dir = if config.cache_dir.as_os_str().is_empty() {
            None
        } else {
            Some(config.cache_dir.clone())
        };
        tracing::info!(
            cache_dir = %config.cache_dir.display(),
            caches_in_mem = config.caches_in_mem,
            caches_on_disk = config.caches_on_disk,
            dataset_dir = %config.dataset_dir.display(),
            datasets_in_mem = config.datasets_in_mem,
            datasets_on_disk = config.datasets_on_disk,
            "created ethash engine"
        );
        let cache = Arc::new(EpochCache::new(
            config.caches_in_mem,
            config.caches_on_disk,
            dir,
        ));
        Self {
            mode: EthashMode::Normal,
            config,
            cache,
            threads: AtomicI32::new(0),
        }
    }

    /// An engine that accepts every seal and seals instantly.
    pub fn new_faker() -> Self {
        Self::with_mode(EthashMode::Fake, Arc::new(EpochCache::new(1, 0, None)))
    }

    /// A real engine with difficulty pinned to one and a single cached epoch.
    pub fn new_tester() -> Self {
        Self::with_mode(EthashMode::Test, Arc::new(EpochCache::new(1, 0, None)))
    }

    /// A real engine sharing one process-wide epoch cache with every other
    /// shared engine.
    pub fn new_shared() -> Self {
        let cache = SHARED_CACHE
            .get_or_init(|| Arc::new(EpochCache::new(3, 0, None)))
            .clone();
        Self::with_mode(EthashMode::Shared, cache)
    }

    fn with_mode(mode: EthashMode, cache: Arc<EpochCache>) -> Self {
        Self {
            mode,
            config: EthashConfig {
                cache_dir: PathBuf::new(),
                caches_on_disk: 0,
                ..EthashConfig::default()
            },
            cache,
            threads: AtomicI32::new(0),
        }
    }

    pub fn mode(&self) -> EthashMode {
        self.mode
    }

    pub fn config(&self) -> &EthashConfig {
        &self.config
    }

    pub fn epoch_cache(&self) -> &Arc<EpochCache> {
        &self.cache
    }

    /// Number of local sealing threads: negative disables local sealing,
    /// zero uses every core.
    pub fn set_threads(&self, threads: i32) {
        self.threads.store(threads, Ordering::SeqCst);
    }

    pub fn threads(&self) -> i32 {
        self.threads.load(Ordering::SeqCst)
    }

    pub fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    pub fn seal_hash(&self, header: &Header) -> Hash {
        seal_hash(header)
    }

    /// Difficulty a child of `parent` created at `time` must carry.
    pub fn calc_difficulty(&self, time: u64, parent: &Header) -> u64 {
        match self.mode {
            EthashMode::Test | EthashMode::Fake => 1,
            EthashMode::Normal | EthashMode::Shared => calc_difficulty(time, parent),
        }
    }

    /// Fill in the consensus fields of `header` before sealing.
    pub fn prepare(&self, parent: &Header, header: &mut Header) {
        header.difficulty = self.calc_difficulty(header.timestamp, parent);
    }

    /// Check `header` against its parent, optionally including the seal.
    pub fn verify_header(
        &self,
        parent: &Header,
        header: &Header,
        check_seal: bool,
    ) -> Result<(), EthashError> {
        if self.mode == EthashMode::Fake {
            return Ok(());
        }
        if header.extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(EthashError::ExtraTooLong {
                len: header.extra.len(),
                max: MAXIMUM_EXTRA_DATA_SIZE,
            });
        }
        if header.timestamp < parent.timestamp {
            return Err(EthashError::OlderBlockTime);
        }
        let expected = self.calc_difficulty(header.timestamp, parent);
        if header.difficulty != expected {
            return Err(EthashError::DifficultyMismatch {
                expected,
                actual: header.difficulty,
            });
        }
        if check_seal {
            self.verify_seal(header)?;
        }
        Ok(())
    }

    /// Check that the header's nonce meets its difficulty.
    pub fn verify_seal(&self, header: &Header) -> Result<(), EthashError> {
        if self.mode == EthashMode::Fake {
            return Ok(());
        }
        let target = work_target(header.difficulty)?;
        let seed = self.cache.seed_for_block(header.number);
        let hash = seal_hash(header);
        if header.mix_digest != mix_digest(&hash, &seed) {
            return Err(EthashError::InvalidMixDigest);
        }
        if work_value(&hash, &seed, header.nonce) < target {
            return Err(EthashError::InvalidPoW);
        }
        Ok(())
    }

    /// Search for a seal for `header`, starting at `start_nonce`.
    ///
    /// Blocks the calling thread; run it on a blocking task. Raising `abort`
    /// makes the search return [`EthashError::Aborted`].
    pub fn seal(
        &self,
        header: &Header,
        start_nonce: u64,
        abort: &AtomicBool,
    ) -> Result<Header, EthashError> {
        let mut sealed = header.clone();
        if self.mode == EthashMode::Fake {
            sealed.nonce = 0;
            sealed.mix_digest = Hash::ZERO;
            return Ok(sealed);
        }

        let threads = match self.threads() {
            t if t < 0 => return Err(EthashError::LocalSealingDisabled),
            0 => rayon::current_num_threads(),
            t => t as usize,
        };

        let target = work_target(header.difficulty)?;
        let seed = self.cache.seed_for_block(header.number);
        let hash = seal_hash(header);
        let nonce = seal::search(&hash, &seed, target, start_nonce, threads, abort)?;

        tracing::debug!(number = header.number, nonce, "found proof-of-work");
        sealed.nonce = nonce;
        sealed.mix_digest = mix_digest(&hash, &seed);
        Ok(sealed)
    }
}
