//! Node-wide event multiplexer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

use ess_types::Block;

/// Events posted by node subsystems.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    /// The local miner sealed and imported a block.
    NewMinedBlock { block: Block },
    /// Chain synchronisation started.
    SyncStarted,
    /// Chain synchronisation finished.
    SyncDone,
    /// Chain synchronisation was aborted.
    SyncFailed { reason: String },
}

type Listener = Box<dyn Fn(&NodeEvent) + Send + Sync>;

/// Synchronous fan-out of [`NodeEvent`]s.
///
/// Listeners run inline on the posting thread; keep them fast. After
/// [`EventMux::stop`] posting is a no-op.
pub struct EventMux {
    listeners: RwLock<Vec<Listener>>,
    stopped: AtomicBool,
}

impl EventMux {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Subscribe through an unbounded channel, for async consumers.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Box::new(move |event| {
            let _ = tx.send(event.clone());
        }));
        rx
    }

    /// Deliver `event` to every listener. Returns `false` once stopped.
    pub fn post(&self, event: NodeEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        for listener in self.listeners.read().unwrap_or_else(|e| e.into_inner()).iter() {
            listener(&event);
        }
        true
    }

    /// Stop delivering events and drop every listener.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::debug!("event mux stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for EventMux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn post_calls_all_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mux = EventMux::new();
        for _ in 0..2 {
            let c = Arc::clone(&counter);
            mux.subscribe(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(mux.post(NodeEvent::SyncStarted));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_mux_drops_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mux = EventMux::new();
        let c = Arc::clone(&counter);
        mux.subscribe(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        mux.stop();
        mux.stop();
        assert!(!mux.post(NodeEvent::SyncDone));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channel_subscribers_receive_clones() {
        let mux = EventMux::new();
        let mut rx = mux.subscribe_channel();
        mux.post(NodeEvent::SyncFailed {
            reason: "no peers".into(),
        });
        assert!(matches!(rx.recv().await, Some(NodeEvent::SyncFailed { .. })));
        mux.stop();
        assert!(rx.recv().await.is_none());
    }
}
