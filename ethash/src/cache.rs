//! Per-epoch seed cache.
//!
//! Seeds are derived by iterating blake2b from the zero hash once per epoch.
//! The cache keeps the most recent `in_mem` seeds in memory and, when a cache
//! directory is configured, mirrors up to `on_disk` of them as files so a
//! restarted node skips the derivation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ess_types::Hash;

use crate::EPOCH_LENGTH;

/// Revision tag embedded in cache file names.
const CACHE_REVISION: u32 = 1;

pub struct EpochCache {
    in_mem: usize,
    on_disk: usize,
    dir: Option<PathBuf>,
    seeds: Mutex<VecDeque<(u64, Hash)>>,
}

impl EpochCache {
    pub fn new(in_mem: usize, on_disk: usize, dir: Option<PathBuf>) -> Self {
        Self {
            in_mem: in_mem.max(1),
            on_disk,
            dir,
            seeds: Mutex::new(VecDeque::new()),
        }
    }

    /// Epoch containing `block_number`.
    pub fn epoch(block_number: u64) -> u64 {
        block_number / EPOCH_LENGTH
    }

    /// Seed for the epoch containing `block_number`.
    pub fn seed_for_block(&self, block_number: u64) -> Hash {
        self.seed(Self::epoch(block_number))
    }

    /// Seed for `epoch`, from memory, disk or freshly derived.
    pub fn seed(&self, epoch: u64) -> Hash {
        let mut seeds = self.seeds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, seed)) = seeds.iter().find(|(e, _)| *e == epoch) {
            return *seed;
        }

        let seed = match self.load(epoch) {
            Some(seed) => seed,
            None => {
                let seed = derive_seed(epoch);
                self.store(epoch, &seed);
                seed
            }
        };

        seeds.push_back((epoch, seed));
        while seeds.len() > self.in_mem {
            seeds.pop_front();
        }
        seed
    }

    /// Number of seeds held in memory.
    pub fn cached(&self) -> usize {
        self.seeds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn file_path(dir: &Path, epoch: u64) -> PathBuf {
        dir.join(format!("cache-R{CACHE_REVISION}-{epoch:08}"))
    }

    fn load(&self, epoch: u64) -> Option<Hash> {
        let dir = self.dir.as_ref().filter(|_| self.on_disk > 0)?;
        let bytes = std::fs::read(Self::file_path(dir, epoch)).ok()?;
        let arr: [u8; 32] = bytes.as_slice().try_into().ok()?;
        tracing::debug!(epoch, "loaded epoch cache from disk");
        Some(Hash::new(arr))
    }

    fn store(&self, epoch: u64, seed: &Hash) {
        let Some(dir) = self.dir.as_ref().filter(|_| self.on_disk > 0) else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(Self::file_path(dir, epoch), seed.as_bytes()))
        {
            tracing::warn!(epoch, dir = %dir.display(), error = %e, "failed to persist epoch cache");
            return;
        }
        // Drop files that fell out of the on-disk window.
        if epoch >= self.on_disk as u64 {
            let stale = epoch - self.on_disk as u64;
            let _ = std::fs::remove_file(Self::file_path(dir, stale));
        }
    }
}

/// Iterate blake2b `epoch` times starting from the zero hash.
pub fn derive_seed(epoch: u64) -> Hash {
    let mut seed = Hash::ZERO;
    for _ in 0..epoch {
        seed = Hash::digest(seed.as_bytes());
    }
    seed
}
