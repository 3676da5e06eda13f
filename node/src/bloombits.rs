//! Bloom-bits index parameters and the retrieval worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ess_bloombits::{BloomRequests, MatcherSession, Retrieval, RetrievalRequest};
use ess_store::ChainDatabase;

use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownSignal;

/// Retrieval tasks serving bloom bit requests.
pub const BLOOM_SERVICE_THREADS: usize = 16;

/// Multiplexer tasks each filter session runs.
pub const BLOOM_FILTER_THREADS: usize = 3;

/// Maximum sections per retrieval request.
pub const BLOOM_RETRIEVAL_BATCH: usize = 16;

/// Time a multiplexer waits for more tasks before sending a batch.
pub const BLOOM_RETRIEVAL_WAIT: Duration = Duration::ZERO;

/// Blocks per bloom-bits section.
pub const BLOOM_BITS_BLOCKS: u64 = 4096;

/// Confirmations a section needs before it is indexed.
pub const BLOOM_CONFIRMS: u64 = 256;

/// Capacity of the shared retrieval request channel.
pub const BLOOM_REQUEST_CAPACITY: usize = 64;

/// Spawn [`BLOOM_SERVICE_THREADS`] workers answering bloom bit retrievals
/// from the database until the node shuts down.
pub fn start_bloom_handlers(
    db: Arc<dyn ChainDatabase>,
    requests: BloomRequests,
    shutdown: ShutdownSignal,
    metrics: Arc<NodeMetrics>,
) -> Vec<JoinHandle<()>> {
    (0..BLOOM_SERVICE_THREADS)
        .map(|_| {
            let db = db.clone();
            let requests = requests.clone();
            let mut shutdown = shutdown.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                loop {
                    let request = tokio::select! {
                        _ = shutdown.wait() => return,
                        request = requests.recv() => request,
                    };
                    let Some(mut request) = request else { return };
                    serve_retrieval(db.as_ref(), &mut request.retrieval);
                    metrics.bloom_retrievals.inc();
                    let _ = request.reply.send(request.retrieval);
                }
            })
        })
        .collect()
}

/// Run [`BLOOM_FILTER_THREADS`] multiplexers feeding `session`'s
/// retrievals into the shared request channel. Shutdown closes the session.
pub fn service_filter(
    session: &MatcherSession,
    sender: mpsc::Sender<RetrievalRequest>,
    shutdown: &ShutdownSignal,
) -> Vec<JoinHandle<()>> {
    (0..BLOOM_FILTER_THREADS)
        .map(|_| {
            let session = session.clone();
            let sender = sender.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.wait() => session.close(),
                    _ = session.multiplex(BLOOM_RETRIEVAL_BATCH, BLOOM_RETRIEVAL_WAIT, sender) => {}
                }
            })
        })
        .collect()
}

/// Fill `retrieval` with the stored bit vectors, or record why not.
pub(crate) fn serve_retrieval(db: &dyn ChainDatabase, retrieval: &mut Retrieval) {
    retrieval.bitsets.clear();
    for &section in &retrieval.sections {
        let head = match db.get_section_head(section) {
            Ok(Some(head)) => head,
            Ok(None) => {
                retrieval.error = Some(format!("section {section} not indexed"));
                return;
            }
            Err(e) => {
                retrieval.error = Some(e.to_string());
                return;
            }
        };
        match db.get_bloom_bits(retrieval.bit, section, &head) {
            Ok(Some(bits)) => retrieval.bitsets.push(bits),
            Ok(None) => {
                retrieval.error = Some(format!("bloom bits {} of section {section} missing", retrieval.bit));
                return;
            }
            Err(e) => {
                retrieval.error = Some(e.to_string());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownController;
    use ess_bloombits::RetrievalRequest;
    use ess_nullables::NullStore;
    use ess_store::BloomBitsStore;
    use ess_types::Hash;
    use tokio::sync::oneshot;

    fn indexed_store() -> Arc<NullStore> {
        let db = Arc::new(NullStore::new());
        let head = Hash::digest(b"section-0");
        db.put_section_head(0, &head).unwrap();
        db.put_bloom_bits(5, 0, &head, &[0xaa; 2]).unwrap();
        db
    }

    #[test]
    fn serves_indexed_sections() {
        let db = indexed_store();
        let mut retrieval = Retrieval {
            bit: 5,
            sections: vec![0],
            ..Default::default()
        };
        serve_retrieval(db.as_ref(), &mut retrieval);
        assert_eq!(retrieval.bitsets, vec![vec![0xaa; 2]]);
        assert!(retrieval.error.is_none());

        let mut missing = Retrieval {
            bit: 5,
            sections: vec![0, 1],
            ..Default::default()
        };
        serve_retrieval(db.as_ref(), &mut missing);
        assert!(missing.error.unwrap().contains("section 1"));
    }

    #[tokio::test]
    async fn workers_answer_and_stop_on_shutdown() {
        let db = indexed_store();
        let requests = BloomRequests::new(4);
        let shutdown = ShutdownController::new();
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let handles = start_bloom_handlers(db, requests.clone(), shutdown.subscribe(), metrics.clone());
        assert_eq!(handles.len(), BLOOM_SERVICE_THREADS);

        let (reply, rx) = oneshot::channel();
        requests
            .sender()
            .send(RetrievalRequest {
                retrieval: Retrieval {
                    bit: 5,
                    sections: vec![0],
                    ..Default::default()
                },
                reply,
            })
            .await
            .unwrap();
        let answer = rx.await.unwrap();
        assert_eq!(answer.bitsets.len(), 1);
        assert_eq!(metrics.bloom_retrievals.get(), 1);

        shutdown.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
