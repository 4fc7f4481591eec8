//! Asymmetric signature plumbing behind the handshake capability (C9).
//!
//! The ceremony that uses these keys is out of scope for this crate (spec
//! §1, §6, §9); this module only supplies the `ring`-backed ed25519
//! primitives a concrete [`crate::crypto::handshake::HandshakeCapability`]
//! implementation would drive, grounded on the teacher's
//! `crypto::signature::{KeyPair, PublicKey}` usage in its bootstrap demos.

use ring::signature::{self, Ed25519KeyPair, KeyPair as _};

use crate::error::{Error, ErrorKind, Result};

pub struct KeyPair {
    inner: Ed25519KeyPair,
}

#[derive(Clone)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Signature {
    bytes: [u8; Signature::LENGTH],
}

impl Signature {
    pub const LENGTH: usize = 64;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::LENGTH {
            return Err(Error::simple(ErrorKind::ShortBuffer));
        }
        let mut bytes = [0u8; Self::LENGTH];
        bytes.copy_from_slice(raw);
        Ok(Signature { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl KeyPair {
    /// Derives a ed25519 keypair from a 32-byte seed.
    pub fn from_bytes(seed: &[u8]) -> Result<Self> {
        if seed.len() != 32 {
            return Err(Error::simple(ErrorKind::ShortBuffer));
        }
        let inner = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| Error::wrapped(ErrorKind::HandshakeFailed, format!("{e}")))?;
        Ok(KeyPair { inner })
    }

    pub fn public_key(&self) -> &[u8] {
        self.inner.public_key().as_ref()
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig = self.inner.sign(msg);
        Signature::from_bytes(sig.as_ref()).expect("ed25519 signatures are always 64 bytes")
    }
}

impl From<&KeyPair> for PublicKey {
    fn from(kp: &KeyPair) -> Self {
        PublicKey { bytes: kp.public_key().to_vec() }
    }
}

impl PublicKey {
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<()> {
        let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.bytes);
        key.verify(msg, sig.as_bytes())
            .map_err(|_| Error::simple(ErrorKind::MessageAuthenticationFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = KeyPair::from_bytes(&[9u8; 32]).unwrap();
        let pk: PublicKey = (&kp).into();
        let sig = kp.sign(b"hello");
        assert!(pk.verify(b"hello", &sig).is_ok());
        assert!(pk.verify(b"goodbye", &sig).is_err());
    }
}
