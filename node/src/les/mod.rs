//! Light client serving.
//!
//! A full node can host one [`LesServer`] extension that answers light
//! clients. [`LightServer`] is the built-in one; [`LightApiBackend`] is the
//! RPC backend of a light client, which reads chain data through an
//! [`OdrBackend`].

mod backend;
mod odr;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use ess_bloombits::BloomIndexer;

use crate::protocol::{Protocol, ServerHandle};

pub use backend::LightApiBackend;
pub use odr::{AccountState, ChainOdr, OdrBackend, OdrError, ProofState};

/// Blocks covered by one bloom trie section.
pub const BLOOM_TRIE_FREQUENCY: u64 = 32768;

pub const LES1: u32 = 1;
pub const LES2: u32 = 2;

/// An extension serving light clients from the full node's data.
///
/// Attached at most once, before the node starts.
pub trait LesServer: Send + Sync {
    fn start(&self, server: &ServerHandle);
    fn stop(&self);
    fn protocols(&self) -> Vec<Protocol>;
    /// Hand over the full node's bloom indexer so the server can build its
    /// bloom trie on top of it.
    fn set_bloom_bits_indexer(&self, indexer: Arc<BloomIndexer>);
}

/// Light server advertising `les/1` and `les/2`.
pub struct LightServer {
    light_serv: u32,
    light_peers: usize,
    indexer: OnceLock<Arc<BloomIndexer>>,
    trie_sections: Arc<AtomicU64>,
    max_peers: AtomicUsize,
    started: AtomicBool,
    quit: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LightServer {
    /// `light_serv` is the percentage of time spent serving, `light_peers`
    /// the number of light clients accepted.
    pub fn new(light_serv: u32, light_peers: usize) -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            light_serv,
            light_peers,
            indexer: OnceLock::new(),
            trie_sections: Arc::new(AtomicU64::new(0)),
            max_peers: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            quit,
            task: Mutex::new(None),
        }
    }

    pub fn light_serv(&self) -> u32 {
        self.light_serv
    }

    pub fn light_peers(&self) -> usize {
        self.light_peers
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn has_indexer(&self) -> bool {
        self.indexer.get().is_some()
    }

    /// Complete bloom trie sections.
    pub fn trie_sections(&self) -> u64 {
        self.trie_sections.load(Ordering::Acquire)
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers.load(Ordering::Relaxed)
    }
}

impl LesServer for LightServer {
    fn start(&self, server: &ServerHandle) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.max_peers
            .store(self.light_peers.min(server.max_peers()), Ordering::Relaxed);

        if let Some(indexer) = self.indexer.get() {
            let size = indexer.section_size();
            let mut sections = indexer.subscribe_sections();
            let mut quit = self.quit.subscribe();
            let trie_sections = self.trie_sections.clone();
            let handle = tokio::spawn(async move {
                loop {
                    let count = *sections.borrow_and_update() * size / BLOOM_TRIE_FREQUENCY;
                    if trie_sections.swap(count, Ordering::AcqRel) != count {
                        tracing::debug!(sections = count, "bloom trie updated");
                    }
                    tokio::select! {
                        _ = quit.changed() => return,
                        changed = sections.changed() => if changed.is_err() { return },
                    }
                }
            });
            *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }
        tracing::info!(
            light_serv = self.light_serv,
            max_peers = self.max_peers(),
            "light server started"
        );
    }

    fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.quit.send_replace(true);
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        tracing::info!("light server stopped");
    }

    fn protocols(&self) -> Vec<Protocol> {
        vec![
            Protocol {
                name: "les",
                version: LES2,
                length: 22,
            },
            Protocol {
                name: "les",
                version: LES1,
                length: 15,
            },
        ]
    }

    fn set_bloom_bits_indexer(&self, indexer: Arc<BloomIndexer>) {
        if self.indexer.set(indexer).is_err() {
            tracing::warn!("light server bloom indexer already set");
        }
    }
}
