//! Seal hashing, work values and the parallel nonce search.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rayon::prelude::*;

use ess_crypto::blake2b_256_multi;
use ess_types::{Hash, Header};

use crate::EthashError;

/// Nonces tried per thread before checking the abort and found flags.
const BATCH_SIZE: u64 = 4096;

/// Hash of the header with its seal fields (nonce, mix digest) cleared.
pub fn seal_hash(header: &Header) -> Hash {
    let mut unsealed = header.clone();
    unsealed.nonce = 0;
    unsealed.mix_digest = Hash::ZERO;
    unsealed.hash()
}

/// Digest binding a seal to the epoch it was produced in.
pub fn mix_digest(seal_hash: &Hash, epoch_seed: &Hash) -> Hash {
    Hash::new(blake2b_256_multi(&[
        seal_hash.as_bytes(),
        epoch_seed.as_bytes(),
    ]))
}

/// Work value of `nonce`: the first eight bytes (LE) of
/// `blake2b(seal_hash || epoch_seed || nonce)`.
pub fn work_value(seal_hash: &Hash, epoch_seed: &Hash, nonce: u64) -> u64 {
    let digest = blake2b_256_multi(&[
        seal_hash.as_bytes(),
        epoch_seed.as_bytes(),
        &nonce.to_le_bytes(),
    ]);
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}

/// Minimum work value accepted at `difficulty`.
pub fn work_target(difficulty: u64) -> Result<u64, EthashError> {
    if difficulty == 0 {
        return Err(EthashError::InvalidDifficulty);
    }
    Ok(u64::MAX - u64::MAX / difficulty)
}

/// Search for a nonce whose work value meets `target`.
///
/// The nonce space is split across `threads` rayon workers, each striding
/// from `start_nonce + thread_id`. The first worker to find a valid nonce
/// signals the others to stop; raising `abort` stops all of them.
pub(crate) fn search(
    seal_hash: &Hash,
    epoch_seed: &Hash,
    target: u64,
    start_nonce: u64,
    threads: usize,
    abort: &AtomicBool,
) -> Result<u64, EthashError> {
    let found = AtomicBool::new(false);
    let result = AtomicU64::new(0);
    let threads = threads.max(1);

    (0..threads).into_par_iter().for_each(|thread_id| {
        let stride = threads as u64;
        let mut nonce = start_nonce.wrapping_add(thread_id as u64);

        loop {
            if found.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                return;
            }

            for _ in 0..BATCH_SIZE {
                if work_value(seal_hash, epoch_seed, nonce) >= target {
                    if !found.swap(true, Ordering::AcqRel) {
                        result.store(nonce, Ordering::Release);
                    }
                    return;
                }
                nonce = nonce.wrapping_add(stride);
            }
        }
    });

    if found.load(Ordering::Acquire) {
        Ok(result.load(Ordering::Acquire))
    } else {
        Err(EthashError::Aborted)
    }
}
