//! Thin wrapper over `threadpool-crossbeam-channel` (the teacher's default
//! `threadpool_crossbeam` feature), used by [`crate::server`] to run
//! `ConnectionOrder`-mode handlers off the connection's own I/O task.

use threadpool_crossbeam_channel::ThreadPool as CrossbeamThreadPool;

pub struct ThreadPool {
    inner: CrossbeamThreadPool,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        ThreadPool { inner: CrossbeamThreadPool::new(num_threads) }
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.execute(job);
    }

    pub fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.queued_count()
    }
}
