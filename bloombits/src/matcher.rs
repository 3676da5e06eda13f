//! Log filter evaluation over the bloom-bits index.
//!
//! A [`MatcherSession`] walks the sections covering a block range in
//! ascending order. The bit vectors it needs are handed out in batches by
//! [`MatcherSession::multiplex`] as [`RetrievalRequest`]s; whoever serves the
//! shared request queue (the node's retrieval workers) fills them from the
//! database and replies. Once every vector of a section has arrived the
//! section is matched and the candidate block numbers are streamed out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::debug;

use ess_types::Bloom;

use crate::MatcherError;

type BloomIndexes = [u32; 3];

/// One bloom bit over a batch of sections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retrieval {
    pub bit: u32,
    pub sections: Vec<u64>,
    /// Filled by the server, one vector per entry of `sections`.
    pub bitsets: Vec<Vec<u8>>,
    /// Set by the server when the vectors could not be loaded.
    pub error: Option<String>,
}

/// A retrieval plus the channel its filled-in copy goes back on.
#[derive(Debug)]
pub struct RetrievalRequest {
    pub retrieval: Retrieval,
    pub reply: oneshot::Sender<Retrieval>,
}

/// Request queue shared by every matcher session (producers) and the
/// retrieval workers (consumers).
#[derive(Clone)]
pub struct BloomRequests {
    tx: mpsc::Sender<RetrievalRequest>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RetrievalRequest>>>,
}

impl BloomRequests {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<RetrievalRequest> {
        self.tx.clone()
    }

    /// Next pending request. Workers calling this concurrently each get a
    /// distinct request.
    pub async fn recv(&self) -> Option<RetrievalRequest> {
        self.rx.lock().await.recv().await
    }
}

/// A compiled log filter.
///
/// `filters` is a conjunction of disjunctions: a block is a candidate when,
/// for every group, at least one clause of the group is in its bloom. A group
/// that is empty or contains an empty clause matches everything.
pub struct Matcher {
    section_size: u64,
    filters: Arc<Vec<Vec<BloomIndexes>>>,
    bits: Vec<u32>,
}

impl Matcher {
    pub fn new(section_size: u64, filters: Vec<Vec<Vec<u8>>>) -> Self {
        let filters: Vec<Vec<BloomIndexes>> = filters
            .into_iter()
            .filter(|group| !group.is_empty() && group.iter().all(|clause| !clause.is_empty()))
            .map(|group| group.iter().map(|clause| Bloom::bit_indexes(clause)).collect())
            .collect();
        let mut bits: Vec<u32> = filters.iter().flatten().flatten().copied().collect();
        bits.sort_unstable();
        bits.dedup();
        Self {
            section_size,
            filters: Arc::new(filters),
            bits,
        }
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Distinct bloom bits the filter needs, ascending.
    pub fn bits(&self) -> &[u32] {
        &self.bits
    }

    /// Start matching blocks `begin..=end`. Candidates are sent on `results`
    /// in ascending order; the channel closes when the range is exhausted or
    /// the session ends. Must be called inside a tokio runtime.
    pub fn start(&self, begin: u64, end: u64, results: mpsc::UnboundedSender<u64>) -> MatcherSession {
        let size = self.section_size.max(8);
        let mut tasks = VecDeque::new();
        if begin <= end {
            for section in begin / size..=end / size {
                for &bit in &self.bits {
                    tasks.push_back((bit, section));
                }
            }
        }
        let (quit, _) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            section_size: size,
            state: Mutex::new(SessionState {
                tasks,
                delivered: HashMap::new(),
                error: None,
            }),
            delivered: Notify::new(),
            quit,
        });
        tokio::spawn(run(
            inner.clone(),
            self.filters.clone(),
            self.bits.clone(),
            begin,
            end,
            results,
        ));
        MatcherSession { inner }
    }
}

struct SessionState {
    tasks: VecDeque<(u32, u64)>,
    delivered: HashMap<(u32, u64), Vec<u8>>,
    error: Option<MatcherError>,
}

struct SessionInner {
    section_size: u64,
    state: Mutex<SessionState>,
    delivered: Notify,
    quit: watch::Sender<bool>,
}

impl SessionInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        *self.quit.borrow()
    }

    fn close(&self) {
        self.quit.send_replace(true);
        self.delivered.notify_one();
    }

    fn fail(&self, err: MatcherError) {
        debug!(error = %err, "bloom matcher session failed");
        self.lock().error.get_or_insert(err);
        self.close();
    }

    /// Take up to `batch` pending sections of the bit at the head of the queue.
    fn allocate(&self, batch: usize) -> Option<(u32, Vec<u64>)> {
        let mut state = self.lock();
        let (bit, _) = *state.tasks.front()?;
        let mut sections = Vec::new();
        state.tasks.retain(|&(b, section)| {
            if b == bit && sections.len() < batch {
                sections.push(section);
                false
            } else {
                true
            }
        });
        Some((bit, sections))
    }

    fn deliver(&self, retrieval: Retrieval) -> Result<(), MatcherError> {
        let first = retrieval.sections.first().copied().unwrap_or_default();
        if let Some(reason) = retrieval.error {
            return Err(MatcherError::Retrieval {
                bit: retrieval.bit,
                section: first,
                reason,
            });
        }
        if retrieval.bitsets.len() != retrieval.sections.len() {
            return Err(MatcherError::Retrieval {
                bit: retrieval.bit,
                section: first,
                reason: format!(
                    "{} bit vectors for {} sections",
                    retrieval.bitsets.len(),
                    retrieval.sections.len()
                ),
            });
        }
        let expected = (self.section_size / 8) as usize;
        if let Some((section, bitset)) = retrieval
            .sections
            .iter()
            .zip(&retrieval.bitsets)
            .find(|(_, bitset)| bitset.len() != expected)
        {
            return Err(MatcherError::InvalidBitset {
                bit: retrieval.bit,
                section: *section,
                len: bitset.len(),
                expected,
            });
        }
        {
            let mut state = self.lock();
            for (section, bitset) in retrieval.sections.into_iter().zip(retrieval.bitsets) {
                state.delivered.insert((retrieval.bit, section), bitset);
            }
        }
        self.delivered.notify_one();
        Ok(())
    }

    /// Wait until every vector of `section` has arrived and take them.
    async fn take_section(&self, section: u64, bits: &[u32]) -> Option<HashMap<u32, Vec<u8>>> {
        let mut quit = self.quit.subscribe();
        loop {
            if self.is_closed() {
                return None;
            }
            {
                let mut state = self.lock();
                if bits.iter().all(|bit| state.delivered.contains_key(&(*bit, section))) {
                    return Some(
                        bits.iter()
                            .filter_map(|bit| {
                                state.delivered.remove(&(*bit, section)).map(|v| (*bit, v))
                            })
                            .collect(),
                    );
                }
            }
            tokio::select! {
                _ = self.delivered.notified() => {}
                _ = closed(&mut quit) => return None,
            }
        }
    }
}

pub(crate) async fn closed(quit: &mut watch::Receiver<bool>) {
    let _ = quit.wait_for(|q| *q).await;
}

fn match_section(
    filters: &[Vec<BloomIndexes>],
    vectors: &HashMap<u32, Vec<u8>>,
    bytes: usize,
) -> Vec<u8> {
    let mut matched = vec![0xffu8; bytes];
    for group in filters {
        let mut any = vec![0u8; bytes];
        for clause in group {
            let mut all = vec![0xffu8; bytes];
            for bit in clause {
                match vectors.get(bit) {
                    Some(vector) => all.iter_mut().zip(vector).for_each(|(a, b)| *a &= b),
                    None => all.fill(0),
                }
            }
            any.iter_mut().zip(&all).for_each(|(a, b)| *a |= b);
        }
        matched.iter_mut().zip(&any).for_each(|(a, b)| *a &= b);
    }
    matched
}

async fn run(
    inner: Arc<SessionInner>,
    filters: Arc<Vec<Vec<BloomIndexes>>>,
    bits: Vec<u32>,
    begin: u64,
    end: u64,
    results: mpsc::UnboundedSender<u64>,
) {
    if begin > end {
        return;
    }
    let size = inner.section_size;
    let bytes = (size / 8) as usize;
    for section in begin / size..=end / size {
        let vectors = match inner.take_section(section, &bits).await {
            Some(vectors) => vectors,
            None => return,
        };
        let matched = match_section(&filters, &vectors, bytes);
        for i in 0..size {
            if matched[(i / 8) as usize] & (1 << (7 - i % 8)) == 0 {
                continue;
            }
            let number = section * size + i;
            if number < begin || number > end {
                continue;
            }
            if results.send(number).is_err() {
                inner.close();
                return;
            }
        }
    }
}

/// A running filter evaluation. Clones share the same session.
#[derive(Clone)]
pub struct MatcherSession {
    inner: Arc<SessionInner>,
}

impl MatcherSession {
    /// Feed the session's pending retrievals into `sender`, `batch` sections
    /// at a time, waiting `wait` before each batch so requests can pile up.
    /// Returns when nothing is left to allocate or the session ends.
    pub async fn multiplex(&self, batch: usize, wait: Duration, sender: mpsc::Sender<RetrievalRequest>) {
        let mut quit = self.inner.quit.subscribe();
        loop {
            if !wait.is_zero() {
                tokio::select! {
                    _ = closed(&mut quit) => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            if self.inner.is_closed() {
                return;
            }
            let Some((bit, sections)) = self.inner.allocate(batch.max(1)) else {
                return;
            };
            let (reply, reply_rx) = oneshot::channel();
            let request = RetrievalRequest {
                retrieval: Retrieval {
                    bit,
                    sections,
                    ..Default::default()
                },
                reply,
            };
            tokio::select! {
                _ = closed(&mut quit) => return,
                sent = sender.send(request) => {
                    if sent.is_err() {
                        self.inner.fail(MatcherError::ChannelClosed);
                        return;
                    }
                }
            }
            let answer = tokio::select! {
                _ = closed(&mut quit) => return,
                answer = reply_rx => answer,
            };
            let delivered = match answer {
                Ok(retrieval) => self.inner.deliver(retrieval),
                Err(_) => Err(MatcherError::RequestDropped),
            };
            if let Err(err) = delivered {
                self.inner.fail(err);
                return;
            }
        }
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The error that ended the session, if any.
    pub fn error(&self) -> Option<MatcherError> {
        self.inner.lock().error.clone()
    }
}
