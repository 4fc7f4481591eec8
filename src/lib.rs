//! Tempest is a message-oriented networking runtime for exchanging typed,
//! versioned, optionally encrypted messages over TCP and UDP.
//!
//! Module map mirrors the component table of the design this crate
//! implements: [`buffer`] (C1), [`serialize`] (C2), [`crypto`] (C3),
//! [`reliable`] (C4), [`connection::tcp`] (C5), [`connection::udp`] (C6),
//! [`server`] (C7), [`protocol`]/[`message`] (C8), [`crypto::handshake`]
//! (C9), and the ambient [`error`]/[`config`] pair (C10).

pub mod async_runtime;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod collections;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod globals;
pub mod message;
pub mod pool;
pub mod protocol;
pub mod reliable;
pub mod serialize;
pub mod server;
pub mod socket;
pub mod sync;
pub mod threadpool;
pub mod timeouts;

#[cfg(test)]
mod testing;

pub use connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState, DisconnectMode};
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, MessageFactory, MessageFlags, MessageHeader};
pub use protocol::{Protocol, ProtocolTable};
pub use server::{ExecutionMode, Server};

use globals::Flag;

static INITIALIZED: Flag = Flag::new();

/// Process-wide init parameters (spec §4.10's `Config` is per-connection;
/// this is the coarser one-time setup the runtime itself needs).
pub struct InitConfig {
    /// Worker thread count for the async runtime backend; `0` picks
    /// [`num_cpus::get`].
    pub async_threads: usize,
}

impl Default for InitConfig {
    fn default() -> Self {
        InitConfig { async_threads: 0 }
    }
}

/// Handle to process-wide runtime state. Dropping it tears the runtime
/// down. Unlike the teacher's `InitGuard` (which flips global statics an
/// already-running async executor depends on, hence `unsafe`), this one
/// just owns the built [`async_runtime::Runtime`] value directly, so no
/// unsafe is needed — see DESIGN.md's Open Question ledger.
pub struct InitGuard {
    runtime: Option<async_runtime::Runtime>,
}

impl InitGuard {
    /// Borrows the runtime so callers can `block_on` their top-level
    /// future on it.
    pub fn runtime(&self) -> &async_runtime::Runtime {
        self.runtime.as_ref().expect("runtime taken")
    }
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        INITIALIZED.unset();
    }
}

/// Initializes process-wide runtime state. Returns `None` if already
/// initialized (matching the teacher's idempotent `init`).
pub fn init(config: InitConfig) -> error::Result<Option<InitGuard>> {
    if INITIALIZED.test() {
        return Ok(None);
    }

    let threads = if config.async_threads == 0 { num_cpus::get() } else { config.async_threads };
    let runtime = async_runtime::build(threads)
        .map_err(|e| Error::wrapped(ErrorKind::Error, e))?;
    INITIALIZED.set();
    Ok(Some(InitGuard { runtime: Some(runtime) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_within_a_process() {
        // Each test binary shares the INITIALIZED flag process-wide, so
        // only assert the first call's shape; a second call must return
        // None rather than double-initializing.
        let first = init(InitConfig::default());
        if let Ok(Some(guard)) = first {
            assert!(init(InitConfig::default()).unwrap().is_none());
            drop(guard);
        }
    }
}
