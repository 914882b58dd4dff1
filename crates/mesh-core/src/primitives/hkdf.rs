//! HKDF-SHA-256 (RFC 5869).

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

pub const HASH_LENGTH: usize = 32;
pub const MAX_OUTPUT_LENGTH: usize = 255 * HASH_LENGTH;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HkdfError {
    #[error("requested output length {0} exceeds maximum {MAX_OUTPUT_LENGTH}")]
    OutputTooLong(usize),
}

/// HKDF-Extract: `PRK = HMAC-Hash(salt, IKM)`.
pub fn extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_LENGTH] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    prk.into()
}

/// HKDF-Expand: stretch `prk` into `length` bytes of output keying material.
pub fn expand(prk: &[u8; HASH_LENGTH], info: &[u8], length: usize) -> Result<Vec<u8>, HkdfError> {
    if length > MAX_OUTPUT_LENGTH {
        return Err(HkdfError::OutputTooLong(length));
    }
    let hk = Hkdf::<Sha256>::from_prk(prk).expect("PRK is always HASH_LENGTH bytes");
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .expect("length is bounded above by MAX_OUTPUT_LENGTH");
    Ok(okm)
}

/// Extract then expand in one call.
pub fn derive(salt: &[u8], ikm: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, HkdfError> {
    let prk = extract(salt, ikm);
    expand(&prk, info, length)
}

/// Derive several independent keys from one extract by expanding once over
/// the concatenated length and slicing. `derive_multiple(..., [n1, n2]) ==
/// derive(..., n1 + n2)` sliced at `n1`.
pub fn derive_multiple(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    lengths: &[usize],
) -> Result<Vec<Vec<u8>>, HkdfError> {
    let total: usize = lengths.iter().sum();
    let okm = derive(salt, ikm, info, total)?;
    let mut out = Vec::with_capacity(lengths.len());
    let mut offset = 0;
    for &len in lengths {
        out.push(okm[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// RFC 5869 test case 1.
    #[test]
    fn rfc5869_test_case_1() {
        let ikm = [0x0bu8; 22];
        let salt = from_hex("000102030405060708090a0b0c");
        let info = from_hex("f0f1f2f3f4f5f6f7f8f9");

        let expected_prk: [u8; 32] =
            from_hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
                .try_into()
                .unwrap();

        let prk = extract(&salt, &ikm);
        assert_eq!(prk, expected_prk);

        let expected_okm = from_hex(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        );
        let okm = expand(&prk, &info, 42).unwrap();
        assert_eq!(okm, expected_okm[..42]);
    }

    #[test]
    fn derive_multiple_matches_single_derive_sliced() {
        let salt = b"salt";
        let ikm = b"input key material";
        let info = b"context";

        let combined = derive(salt, ikm, info, 48).unwrap();
        let parts = derive_multiple(salt, ikm, info, &[16, 32]).unwrap();

        assert_eq!(parts[0], combined[..16]);
        assert_eq!(parts[1], combined[16..]);
    }

    #[test]
    fn expand_rejects_output_too_long() {
        let prk = [0u8; HASH_LENGTH];
        let err = expand(&prk, b"info", MAX_OUTPUT_LENGTH + 1).unwrap_err();
        assert_eq!(err, HkdfError::OutputTooLong(MAX_OUTPUT_LENGTH + 1));
    }

    #[test]
    fn derive_is_deterministic() {
        let a = derive(b"s", b"ikm", b"info", 32).unwrap();
        let b = derive(b"s", b"ikm", b"info", 32).unwrap();
        assert_eq!(a, b);
    }
}
