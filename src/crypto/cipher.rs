//! Symmetric encrypt/decrypt half of the crypto envelope (spec §4.3, C3).
//!
//! AES-128-CBC with manual zero-padding to the block boundary (the payload
//! region is padded via [`crate::buffer::Writer::pad`] before this module
//! ever sees it, matching the source's `Pad(n)` step rather than a PKCS7
//! scheme). `ring` (already a crate dependency for signatures/hashing)
//! deliberately does not expose raw block ciphers, so this uses the
//! RustCrypto `aes`+`cbc` crates, the idiomatic choice for manual CBC in
//! the Rust ecosystem.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};

use crate::error::{Error, ErrorKind, Result};

pub const BLOCK_SIZE: usize = 16;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 16;

pub type AesKey = [u8; KEY_LEN];
pub type Iv = [u8; IV_LEN];

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Returns the number of zero-padding bytes needed so that `payload_len`
/// becomes a multiple of [`BLOCK_SIZE`].
pub fn padding_len(payload_len: usize) -> usize {
    let rem = payload_len % BLOCK_SIZE;
    if rem == 0 {
        0
    } else {
        BLOCK_SIZE - rem
    }
}

/// Generates a fresh random IV. One atomic section per spec §4.3's
/// concurrency note; callers hold the connection's crypto mutex across
/// "generate IV, then encrypt" as a unit.
pub fn generate_iv() -> Iv {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypts `buf` in place. `buf.len()` MUST already be a multiple of
/// [`BLOCK_SIZE`] (callers pad with [`padding_len`] first).
pub fn encrypt_in_place(key: &AesKey, iv: &Iv, buf: &mut [u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::simple(ErrorKind::MalformedFrame));
    }
    let msg_len = buf.len();
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(buf, msg_len)
        .map_err(|_| Error::simple(ErrorKind::MalformedFrame))?;
    Ok(())
}

/// Decrypts `ciphertext` into a freshly allocated plaintext buffer.
/// `ciphertext.len()` MUST be a multiple of [`BLOCK_SIZE`].
pub fn decrypt(key: &AesKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::simple(ErrorKind::MalformedFrame));
    }
    let mut buf = ciphertext.to_vec();
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::simple(ErrorKind::MalformedFrame))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key: AesKey = [7u8; KEY_LEN];
        let iv = generate_iv();

        let plaintext = b"hello tempest!!!".to_vec(); // 16 bytes, already block-aligned
        let mut buf = plaintext.clone();
        encrypt_in_place(&key, &iv, &mut buf).unwrap();
        assert_ne!(buf, plaintext);

        let decrypted = decrypt(&key, &iv, &buf).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn padding_len_rounds_up_to_block_size() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(16), 0);
        assert_eq!(padding_len(1), 15);
        assert_eq!(padding_len(17), 15);
    }

    #[test]
    fn rejects_unaligned_buffers() {
        let key: AesKey = [1u8; KEY_LEN];
        let iv = [2u8; IV_LEN];
        let mut buf = vec![0u8; 5];
        assert!(encrypt_in_place(&key, &iv, &mut buf).is_err());
    }
}
