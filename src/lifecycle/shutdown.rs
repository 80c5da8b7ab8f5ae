//! Shutdown coordination for the relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Waker;

/// Handle that stops a running reactor from any thread.
///
/// Triggering sets a flag and wakes the poller; the reactor notices on its
/// next loop iteration, drops every connection and returns from `run`.
#[derive(Clone)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    /// Create a coordinator bound to the reactor's waker.
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            waker,
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            tracing::error!(error = %e, "Failed to wake reactor for shutdown");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    #[test]
    fn trigger_is_visible_to_clones() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let shutdown = Shutdown::new(waker);
        let observer = shutdown.clone();

        assert!(!observer.is_triggered());
        shutdown.trigger();
        assert!(observer.is_triggered());
    }
}
