//! Cryptographic and wire primitives for the mesh core.
//!
//! Every primitive here is exposed as a standalone function or small type so
//! it can be tested directly against its defining RFC, independent of any
//! higher-level protocol state machine built on top of it.

pub mod aead;
pub mod compress;
pub mod crc;
pub mod hash;
pub mod hkdf;
pub mod x25519;

pub use aead::{aead_decrypt, aead_encrypt, AeadError, NONCE_LEN, TAG_LEN};
pub use compress::{compress, decompress, CompressError, CompressedPayload};
pub use crc::crc32;
pub use hash::{hmac_sha256, sha256};
pub use hkdf::{derive, derive_multiple, expand, extract, HkdfError, HASH_LENGTH, MAX_OUTPUT_LENGTH};
pub use x25519::{diffie_hellman, EphemeralKeypair, StaticKeypair};
