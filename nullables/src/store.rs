//! Nullable store: thread-safe in-memory chain database for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use ess_store::{BloomBitsStore, ChainDatabase, ChainStore, MetaStore, StoreError};
use ess_types::Hash;

#[derive(Default)]
struct Tables {
    meta: HashMap<String, Vec<u8>>,
    headers: HashMap<Hash, (u64, Vec<u8>)>,
    bodies: HashMap<Hash, Vec<u8>>,
    receipts: HashMap<Hash, Vec<u8>>,
    canonical: HashMap<u64, Hash>,
    head: Option<Hash>,
    chain_configs: HashMap<Hash, Vec<u8>>,
    bloom_bits: HashMap<(u32, u64, Hash), Vec<u8>>,
    section_heads: HashMap<u64, Hash>,
}

/// An in-memory chain database.
/// Thread-safe for use with tokio's multi-threaded runtime.
#[derive(Default)]
pub struct NullStore {
    tables: Mutex<Tables>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of bloom bit vectors stored across all sections.
    pub fn bloom_bits_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).bloom_bits.len()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(f(&mut self.tables.lock().unwrap_or_else(|e| e.into_inner())))
    }
}

impl MetaStore for NullStore {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.meta.insert(key.to_string(), value.to_vec());
        })
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.meta.get(key).cloned())
    }

    fn delete_meta(&self, key: &str) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.meta.remove(key);
        })
    }
}

impl ChainStore for NullStore {
    fn put_header(&self, hash: &Hash, number: u64, header: &[u8]) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.headers.insert(*hash, (number, header.to_vec()));
        })
    }

    fn get_header(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.headers.get(hash).map(|(_, h)| h.clone()))
    }

    fn get_header_number(&self, hash: &Hash) -> Result<Option<u64>, StoreError> {
        self.with_tables(|t| t.headers.get(hash).map(|(n, _)| *n))
    }

    fn put_body(&self, hash: &Hash, body: &[u8]) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.bodies.insert(*hash, body.to_vec());
        })
    }

    fn get_body(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.bodies.get(hash).cloned())
    }

    fn put_receipts(&self, hash: &Hash, receipts: &[u8]) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.receipts.insert(*hash, receipts.to_vec());
        })
    }

    fn get_receipts(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.receipts.get(hash).cloned())
    }

    fn put_canonical_hash(&self, number: u64, hash: &Hash) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.canonical.insert(number, *hash);
        })
    }

    fn get_canonical_hash(&self, number: u64) -> Result<Option<Hash>, StoreError> {
        self.with_tables(|t| t.canonical.get(&number).copied())
    }

    fn delete_canonical_hash(&self, number: u64) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.canonical.remove(&number);
        })
    }

    fn put_head_header_hash(&self, hash: &Hash) -> Result<(), StoreError> {
        self.with_tables(|t| t.head = Some(*hash))
    }

    fn get_head_header_hash(&self) -> Result<Option<Hash>, StoreError> {
        self.with_tables(|t| t.head)
    }

    fn put_chain_config(&self, genesis: &Hash, config: &[u8]) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.chain_configs.insert(*genesis, config.to_vec());
        })
    }

    fn get_chain_config(&self, genesis: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.chain_configs.get(genesis).cloned())
    }
}

impl BloomBitsStore for NullStore {
    fn put_bloom_bits(
        &self,
        bit: u32,
        section: u64,
        head: &Hash,
        bits: &[u8],
    ) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.bloom_bits.insert((bit, section, *head), bits.to_vec());
        })
    }

    fn get_bloom_bits(
        &self,
        bit: u32,
        section: u64,
        head: &Hash,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_tables(|t| t.bloom_bits.get(&(bit, section, *head)).cloned())
    }

    fn put_section_head(&self, section: u64, head: &Hash) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.section_heads.insert(section, *head);
        })
    }

    fn get_section_head(&self, section: u64) -> Result<Option<Hash>, StoreError> {
        self.with_tables(|t| t.section_heads.get(&section).copied())
    }

    fn delete_section_head(&self, section: u64) -> Result<(), StoreError> {
        self.with_tables(|t| {
            t.section_heads.remove(&section);
        })
    }
}

impl ChainDatabase for NullStore {
    fn close(&self) -> Result<(), StoreError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
