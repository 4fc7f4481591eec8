//! HMAC-SHA256 sign/verify half of the crypto envelope (spec §4.3, C3).
//!
//! Verification is constant-time with respect to the position of the first
//! mismatching byte (spec §8 invariant 6): implemented as a bitwise-or
//! accumulator via `subtle::ConstantTimeEq`, never a short-circuiting `==`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, ErrorKind, Result};

pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 32; // HMAC-SHA256 output size

pub type HmacKey = [u8; KEY_LEN];

type HmacSha256 = Hmac<Sha256>;

/// Computes the HMAC-SHA256 tag over `data`.
pub fn sign(key: &HmacKey, data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    out
}

/// Verifies `tag` against a freshly computed HMAC-SHA256 of `data`, in
/// constant time with respect to the first mismatching byte. A length
/// mismatch is rejected outright (spec §4.3).
pub fn verify(key: &HmacKey, data: &[u8], tag: &[u8]) -> Result<()> {
    if tag.len() != TAG_LEN {
        return Err(Error::simple(ErrorKind::MessageAuthenticationFailed));
    }
    let expected = sign(key, data);
    // `ConstantTimeEq` compares byte-by-byte with a bitwise-or accumulator
    // rather than a short-circuiting equality check.
    let ok: bool = expected.ct_eq(tag).into();
    if ok {
        Ok(())
    } else {
        Err(Error::simple(ErrorKind::MessageAuthenticationFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = [3u8; KEY_LEN];
        let data = b"the message bytes to authenticate";
        let tag = sign(&key, data);
        assert!(verify(&key, data, &tag).is_ok());
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let key = [3u8; KEY_LEN];
        let data = b"payload";
        let mut tag = sign(&key, data);
        tag[0] ^= 0xFF;
        assert!(verify(&key, data, &tag).is_err());
    }

    #[test]
    fn tampered_data_is_rejected() {
        let key = [3u8; KEY_LEN];
        let tag = sign(&key, b"payload-a");
        assert!(verify(&key, b"payload-b", &tag).is_err());
    }

    #[test]
    fn wrong_length_tag_is_rejected() {
        let key = [3u8; KEY_LEN];
        assert!(verify(&key, b"payload", &[0u8; 4]).is_err());
    }
}
