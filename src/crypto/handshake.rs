//! Abstract handshake capability (C9, spec §1 "out of scope", §6, §9).
//!
//! The concrete public-key ceremony is an external collaborator; this
//! module only specifies its contract: negotiate a [`SymmetricKeys`] pair
//! before a connection carrying any `requires_handshake` protocol leaves
//! [`crate::connection::ConnectionState::Handshaking`].

use async_trait::async_trait;

use crate::crypto::cipher::AesKey;
use crate::crypto::mac::HmacKey;
use crate::error::Result;

/// The symmetric keys a completed handshake hands to the rest of the
/// connection's lifetime for the C3 crypto envelope.
#[derive(Clone)]
pub struct SymmetricKeys {
    pub aes_key: AesKey,
    pub hmac_key: HmacKey,
}

/// Which side of the handshake a connection is playing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Dialer,
    Acceptor,
}

/// Byte-oriented transport the handshake drives to exchange its own
/// messages on protocol id 1, independent of whether the underlying
/// connection is TCP or UDP.
#[async_trait]
pub trait HandshakeTransport: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// The abstract asymmetric-crypto capability a connection depends on.
/// Real implementations perform a public-key ceremony (e.g. a signed
/// Diffie-Hellman exchange using [`crate::crypto::signature`] keys) and
/// are supplied by the embedder; this crate only consumes the trait.
#[async_trait]
pub trait HandshakeCapability: Send + Sync {
    async fn negotiate(
        &self,
        role: Role,
        transport: &mut dyn HandshakeTransport,
    ) -> Result<SymmetricKeys>;
}

/// A fixed pre-shared key capability, standing in for the real ceremony in
/// tests and demos. Completes immediately without touching the transport.
pub struct PresharedKeysCapability {
    keys: SymmetricKeys,
}

impl PresharedKeysCapability {
    pub fn new(keys: SymmetricKeys) -> Self {
        PresharedKeysCapability { keys }
    }
}

#[async_trait]
impl HandshakeCapability for PresharedKeysCapability {
    async fn negotiate(
        &self,
        _role: Role,
        _transport: &mut dyn HandshakeTransport,
    ) -> Result<SymmetricKeys> {
        Ok(self.keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait]
    impl HandshakeTransport for NullTransport {
        async fn send(&mut self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn preshared_capability_completes_immediately() {
        let keys = SymmetricKeys { aes_key: [1; 16], hmac_key: [2; 32] };
        let cap = PresharedKeysCapability::new(keys);
        let mut transport = NullTransport;
        let negotiated = cap.negotiate(Role::Dialer, &mut transport).await.unwrap();
        assert_eq!(negotiated.aes_key, [1; 16]);
        assert_eq!(negotiated.hmac_key, [2; 32]);
    }
}
