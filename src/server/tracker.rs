//! Active connection tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Count connections currently being served
//! - Release the count when a connection's task ends, even on panic
//! - Let shutdown wait until every connection has finished

use std::sync::Arc;

use tokio::sync::watch;

use crate::observability::metrics;

/// Tracks active connections.
///
/// Uses a watch channel so waiters wake on every count change instead of polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { active: Arc::new(tx) }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        metrics::set_active_connections(self.active_count());
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    /// Wait until no connection is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks one connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        let remaining = *self.active.borrow();
        metrics::set_active_connections(remaining);
        tracing::trace!(active = remaining, "Connection released");
    }
}
