//! Coarse-locked LIFO send-buffer pool (spec §5, §9, C5 support).
//!
//! Encoding a message allocates a `Vec<u8>` scratch buffer; reusing those
//! across sends avoids an allocation per message on the hot path. The pool
//! is capped at [`crate::config::Config::buffer_limit`] entries: once full,
//! returned buffers are simply dropped instead of growing the pool further.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// A bounded pool of reusable `Vec<u8>` send buffers.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    limit: usize,
    len: AtomicUsize,
}

impl BufferPool {
    pub fn new(limit: usize) -> Self {
        BufferPool { buffers: Mutex::new(Vec::new()), limit, len: AtomicUsize::new(0) }
    }

    /// Takes a buffer from the pool, or allocates a fresh one if it is
    /// empty.
    pub fn take(&self) -> Vec<u8> {
        let mut guard = self.buffers.lock();
        match guard.pop() {
            Some(buf) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                buf
            }
            None => Vec::new(),
        }
    }

    /// Returns `buf` to the pool (cleared), unless the pool is already at
    /// `limit`, in which case it is dropped.
    pub fn put(&self, mut buf: Vec<u8>) {
        if self.len.load(Ordering::Relaxed) >= self.limit {
            return;
        }
        buf.clear();
        let mut guard = self.buffers.lock();
        if guard.len() >= self.limit {
            return;
        }
        guard.push(buf);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_on_empty_pool_allocates_fresh() {
        let pool = BufferPool::new(4);
        let buf = pool.take();
        assert!(buf.is_empty());
    }

    #[test]
    fn put_then_take_reuses_the_same_buffer() {
        let pool = BufferPool::new(4);
        let mut buf = pool.take();
        buf.extend_from_slice(b"hello");
        pool.put(buf);
        assert_eq!(pool.len(), 1);

        let reused = pool.take();
        assert!(reused.is_empty()); // cleared, but capacity likely retained
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn put_beyond_limit_drops_the_buffer() {
        let pool = BufferPool::new(1);
        pool.put(vec![1, 2, 3]);
        pool.put(vec![4, 5, 6]);
        assert_eq!(pool.len(), 1);
    }
}
