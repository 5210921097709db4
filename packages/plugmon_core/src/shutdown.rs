//! Process-wide shutdown signal
//!
//! A clonable cancellation handle threaded through the supervisor and
//! every device session, checked at each timed wait so shutdown is
//! observed within one interval. The latch means a task that starts
//! waiting after the trigger still sees it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Request shutdown. Idempotent; wakes every current and future waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // Re-check after subscribing: a trigger landing between the first
        // check and the subscribe would otherwise be missed.
        if self.is_triggered() {
            return;
        }
        // Any wakeup (message or lag) implies the trigger fired.
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
