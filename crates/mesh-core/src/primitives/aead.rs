//! ChaCha20-Poly1305 AEAD (RFC 8439).

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AeadError {
    #[error("authentication failed")]
    Invalid,
}

/// Encrypt `plaintext`, returning `ciphertext ∥ tag[16]`.
pub fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("encryption with a valid key/nonce never fails")
}

/// Decrypt `ciphertext ∥ tag[16]`. Never distinguishes *why* verification
/// failed — a bad tag and a bad key both just return `AeadError::Invalid`.
pub fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [0x42u8; 32];
        let nonce = [0x01u8; NONCE_LEN];
        let pt = b"the quick brown fox";

        let ct = aead_encrypt(&key, &nonce, b"aad", pt);
        assert_eq!(ct.len(), pt.len() + TAG_LEN);

        let recovered = aead_decrypt(&key, &nonce, b"aad", &ct).unwrap();
        assert_eq!(recovered, pt);
    }

    #[test]
    fn flipped_byte_rejected() {
        let key = [0x11u8; 32];
        let nonce = [0x02u8; NONCE_LEN];
        let mut ct = aead_encrypt(&key, &nonce, b"", b"payload");
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert_eq!(aead_decrypt(&key, &nonce, b"", &ct), Err(AeadError::Invalid));
    }

    #[test]
    fn wrong_aad_rejected() {
        let key = [0x33u8; 32];
        let nonce = [0x03u8; NONCE_LEN];
        let ct = aead_encrypt(&key, &nonce, b"context-a", b"payload");
        assert_eq!(
            aead_decrypt(&key, &nonce, b"context-b", &ct),
            Err(AeadError::Invalid)
        );
    }

    #[test]
    fn wrong_key_rejected() {
        let nonce = [0x04u8; NONCE_LEN];
        let ct = aead_encrypt(&[0x55u8; 32], &nonce, b"", b"payload");
        assert_eq!(
            aead_decrypt(&[0x66u8; 32], &nonce, b"", &ct),
            Err(AeadError::Invalid)
        );
    }
}
