//! Connection Limiting
//!
//! Caps concurrent WebSocket connections to prevent resource exhaustion.
//! Slots are held by RAII guards so a connection task releasing in any code
//! path (normal close, auth failure, panic unwind) frees its slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks and enforces the concurrent-connection cap.
#[derive(Clone)]
pub struct ConnectionLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionLimiter {
    /// Creates a limiter with the given maximum.
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            inner: Arc::new(LimiterInner {
                active: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Tries to acquire a slot. `None` means the server is at capacity.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        loop {
            let current = self.inner.active.load(Ordering::SeqCst);
            if current >= self.inner.max_connections {
                return None;
            }
            if self
                .inner
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    inner: self.inner.clone(),
                });
            }
        }
    }

    /// Current number of held slots.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }
}

/// RAII guard releasing its slot on drop.
pub struct ConnectionGuard {
    inner: Arc<LimiterInner>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
