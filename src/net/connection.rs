//! Socket lifetime tracking.
//!
//! # Responsibilities
//! - Count open player sockets and enforce `server.max_connections`
//! - Let shutdown wait until every socket has drained
//!
//! # Design Decisions
//! - RAII guard: the count can't leak when a socket task panics or is
//!   aborted
//! - Draining waits on a watch channel instead of polling

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::session::ConnectionId;

#[derive(Debug)]
struct TrackerInner {
    active: AtomicUsize,
    limit: usize,
    // carries the active count after every change
    changed: watch::Sender<usize>,
}

/// Tracks open sockets for admission and graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new(limit: usize) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                active: AtomicUsize::new(0),
                limit,
                changed,
            }),
        }
    }

    /// Admit one socket, or `None` if the limit is reached.
    pub fn try_track(&self, id: ConnectionId) -> Option<ConnectionGuard> {
        let admitted = self
            .inner
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.inner.limit).then_some(n + 1)
            });
        let count = admitted.ok()? + 1;
        self.inner.changed.send_replace(count);
        tracing::trace!(connection_id = %id, active = count, "Socket opened");
        Some(ConnectionGuard {
            inner: self.inner.clone(),
            id,
        })
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Wait until every socket closed, up to `timeout`. Returns whether
    /// the tracker drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.changed.subscribe();
        let drained = tokio::time::timeout(timeout, async {
            while self.active_count() > 0 {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        drained.is_ok() && self.active_count() == 0
    }
}

/// Held for the lifetime of one socket.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.inner.changed.send_replace(remaining);
        tracing::trace!(connection_id = %self.id, active = remaining, "Socket closed");
    }
}
