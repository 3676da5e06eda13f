//! Node shutdown signal.
//!
//! A single [`ShutdownController`] is owned by the node. Background tasks
//! hold a [`ShutdownSignal`] and `select!` on [`ShutdownSignal::wait`]
//! alongside their main loop. The controller closes the signal at most once.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::watch;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
    fired: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// An observer of the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Close the signal. Returns `false` when it was already closed.
    pub fn shutdown(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            tracing::debug!("shutdown signal already closed");
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait for SIGTERM or SIGINT, then close the signal.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
        }

        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the node shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once the node is shutting down.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn programmatic_shutdown_notifies_subscribers() {
        let controller = ShutdownController::new();
        let mut signal = controller.subscribe();
        assert!(!signal.is_shutdown());
        assert!(controller.shutdown());
        signal.wait().await;
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn late_subscribers_see_closed_signal() {
        let controller = ShutdownController::new();
        controller.shutdown();
        let mut late = controller.subscribe();
        late.wait().await;
        assert!(late.is_shutdown());
    }

    #[test]
    fn closes_exactly_once() {
        let controller = ShutdownController::new();
        assert!(controller.shutdown());
        assert!(!controller.shutdown());
        assert!(controller.is_shutdown());
    }
}
