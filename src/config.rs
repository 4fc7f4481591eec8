//! Embedder-facing configuration (spec §6).

use std::time::Duration;

/// Selectable HMAC hash algorithm (spec §6 `signing_hash_algorithm`).
///
/// Only `Sha256` is implemented by [`crate::crypto::mac`] today; the enum
/// exists so embedders can see (and tests can assert on) the default
/// without hard-coding a string, and so a second variant can be added
/// without an API break.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SigningHashAlgorithm {
    Sha256,
}

impl Default for SigningHashAlgorithm {
    fn default() -> Self {
        SigningHashAlgorithm::Sha256
    }
}

/// Process/connection configuration, shared (`Arc`) across a client or
/// server's connections.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frames larger than this trigger an immediate disconnect (spec §4.5).
    pub max_message_length: u32,
    /// Ceiling on concurrent outbound send buffers (spec §4.5, §9).
    pub buffer_limit: usize,
    /// HMAC variant used by the crypto envelope (spec §4.3).
    pub signing_hash_algorithm: SigningHashAlgorithm,
    /// UDP retransmit threshold for unacked reliable messages (spec §4.6).
    pub resend_interval: Duration,
    /// Keepalive ping cadence (spec §6; not part of the wire contract).
    pub ping_interval: Duration,
}

impl Config {
    pub const DEFAULT_MAX_MESSAGE_LENGTH: u32 = 1_048_576;
    pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

    fn default_buffer_limit() -> usize {
        10 * num_cpus::get()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_message_length: Self::DEFAULT_MAX_MESSAGE_LENGTH,
            buffer_limit: Self::default_buffer_limit(),
            signing_hash_algorithm: SigningHashAlgorithm::default(),
            resend_interval: Self::DEFAULT_RESEND_INTERVAL,
            ping_interval: Self::DEFAULT_PING_INTERVAL,
        }
    }
}
