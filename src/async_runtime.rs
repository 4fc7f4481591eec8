//! Runtime init and task spawning, grounded on the teacher's
//! `async_runtime/tokio/mod.rs` (`Builder::new_multi_thread()` +
//! `thread_stack_size`), generalized to also cover the `async-std`
//! alternate backend the teacher ships behind its own feature flag.

#[cfg(feature = "async_runtime_tokio")]
mod backend {
    pub type JoinHandle<T> = ::tokio::task::JoinHandle<T>;
    pub type Runtime = ::tokio::runtime::Runtime;

    pub fn build(num_threads: usize) -> std::io::Result<Runtime> {
        ::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads)
            .thread_name("tempest-worker")
            .thread_stack_size(2 * 1024 * 1024)
            .enable_all()
            .build()
    }

    pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        ::tokio::spawn(future)
    }
}

#[cfg(all(feature = "async_runtime_async_std", not(feature = "async_runtime_tokio")))]
mod backend {
    pub type JoinHandle<T> = ::async_std::task::JoinHandle<T>;

    pub struct Runtime;

    pub fn build(_num_threads: usize) -> std::io::Result<Runtime> {
        Ok(Runtime)
    }

    pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        ::async_std::task::spawn(future)
    }
}

pub use backend::{build, spawn, JoinHandle, Runtime};

/// Builds a runtime sized to the host, matching the teacher's
/// `num_cpus`-driven worker count and [`crate::config::Config::default_buffer_limit`].
pub fn build_default() -> std::io::Result<Runtime> {
    build(num_cpus::get())
}
