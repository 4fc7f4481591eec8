//! Async wait-group standing in for the source's `pendingAsync` spin-sleep
//! counter (spec §4.5, §9 — explicitly invites this substitution).
//!
//! A connection increments a [`PendingGuard`] once per in-flight send and
//! decrements it on completion; graceful disconnect awaits the guard
//! draining to zero instead of polling a counter on a timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner {
    count: AtomicUsize,
    notify: Notify,
}

/// A cloneable, reference-counted wait-group.
#[derive(Clone)]
pub struct PendingGuard {
    inner: Arc<Inner>,
}

impl Default for PendingGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingGuard {
    pub fn new() -> Self {
        PendingGuard { inner: Arc::new(Inner { count: AtomicUsize::new(0), notify: Notify::new() }) }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Registers one in-flight unit of work, returning a [`Ticket`] that
    /// decrements the count (and wakes any waiter it drained to zero) when
    /// dropped.
    pub fn enter(&self) -> Ticket {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        Ticket { inner: self.inner.clone() }
    }

    /// Waits until the count reaches zero. If new work is registered after
    /// the count briefly hits zero but before this call observes it, this
    /// keeps waiting for the next time it reaches zero.
    pub async fn wait_idle(&self) {
        loop {
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}

/// RAII handle for one unit of pending work registered with a [`PendingGuard`].
pub struct Ticket {
    inner: Arc<Inner>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
