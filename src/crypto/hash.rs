//! SHA-256 digests, grounded on the teacher's `crypto/hash/ring_sha2/mod.rs`
//! `Digest` newtype pattern.

use ring::digest::{self, SHA256, SHA256_OUTPUT_LEN};

use crate::error::{Error, ErrorKind, Result};

/// A fixed-length SHA-256 digest, used to hash dynamic type-table tags
/// (spec §9 "Dynamic type table") down to a stable, compact representation.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    pub const LENGTH: usize = SHA256_OUTPUT_LEN;

    pub fn of(bytes: &[u8]) -> Self {
        let digest = digest::digest(&SHA256, bytes);
        Self::from_bytes_unchecked(digest.as_ref())
    }

    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err(Error::simple(ErrorKind::ShortBuffer));
        }
        Ok(Self::from_bytes_unchecked(raw_bytes))
    }

    fn from_bytes_unchecked(raw_bytes: &[u8]) -> Self {
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Self(inner)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_digest() {
        assert!(Digest::of(b"tempest") == Digest::of(b"tempest"));
        assert!(Digest::of(b"tempest") != Digest::of(b"other"));
    }
}
