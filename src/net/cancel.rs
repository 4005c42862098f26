//! Per-connection cancellation scope.
//!
//! Once a scope fires, every pending or future async operation started through
//! the owning connection resolves as cancelled instead of successful. Firing is
//! one-way and idempotent.

use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation signal owned by one connection.
///
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancellationScope {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationScope {
    /// Create a scope that has not fired.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the scope.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the scope has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Token for observing the scope from a spawned task.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`CancellationScope`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Whether the scope has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once the scope fires.
    ///
    /// A scope whose every handle was dropped counts as fired.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}
