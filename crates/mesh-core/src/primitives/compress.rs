//! Custom LZ4-style payload codec.
//!
//! Framing: a 4-byte little-endian original-size header, followed by a
//! sequence of `(token, [extended literal-length bytes], literals,
//! offset[2 LE], [extended match-length bytes])`. The token's high nibble is
//! the literal length (0-14, or 15 to signal an extension), the low nibble is
//! the match length minus 4 (same extension convention). The final sequence
//! in a block carries literals only — no offset/match-length follows it,
//! since the declared original size tells the decoder when to stop.
//!
//! This is NOT wire-compatible with real LZ4: there is no frame magic, no
//! block checksum, and the size header is mandatory rather than
//! frame-descriptor-gated.

use std::collections::HashMap;
use thiserror::Error;

const MIN_MATCH: usize = 4;
const MAX_DISTANCE: usize = 65535;
const MAX_ORIGINAL_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CompressError {
    #[error("compressed data truncated")]
    Truncated,
    #[error("declared original size {0} exceeds the {MAX_ORIGINAL_SIZE}-byte limit")]
    SizeTooLarge(usize),
    #[error("match offset is zero")]
    ZeroOffset,
    #[error("match references bytes before the start of output")]
    OffsetOutOfRange,
    #[error("decoded length does not match the declared original size")]
    LengthMismatch,
}

/// Result of [`compress`]: either the custom-framed compressed form, or the
/// input unchanged when compression did not shrink it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPayload {
    pub compressed: bool,
    pub data: Vec<u8>,
}

/// Compress `input`. Falls back to an identity copy (`compressed = false`)
/// whenever the framed representation would not be strictly smaller.
pub fn compress(input: &[u8]) -> CompressedPayload {
    let framed = encode(input);
    if framed.len() < input.len() {
        CompressedPayload {
            compressed: true,
            data: framed,
        }
    } else {
        CompressedPayload {
            compressed: false,
            data: input.to_vec(),
        }
    }
}

/// Inverse of [`compress`]. When `compressed` is false, `data` is returned
/// unchanged.
pub fn decompress(data: &[u8], compressed: bool) -> Result<Vec<u8>, CompressError> {
    if !compressed {
        return Ok(data.to_vec());
    }
    decode(data)
}

fn encode_length(value: usize) -> (u8, Vec<u8>) {
    if value < 15 {
        return (value as u8, Vec::new());
    }
    let mut remaining = value - 15;
    let mut ext = Vec::new();
    while remaining >= 255 {
        ext.push(255u8);
        remaining -= 255;
    }
    ext.push(remaining as u8);
    (15, ext)
}

fn read_length(data: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, CompressError> {
    if nibble < 15 {
        return Ok(nibble as usize);
    }
    let mut total = 15usize;
    loop {
        let byte = *data.get(*pos).ok_or(CompressError::Truncated)?;
        *pos += 1;
        total += byte as usize;
        if byte != 255 {
            break;
        }
    }
    Ok(total)
}

fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(input.len() as u32).to_le_bytes());

    let n = input.len();
    let mut pos = 0usize;
    let mut literal_start = 0usize;
    let mut table: HashMap<u32, usize> = HashMap::new();

    while pos < n {
        let mut found: Option<(usize, usize)> = None;

        if pos + MIN_MATCH <= n {
            let key = u32::from_le_bytes(input[pos..pos + 4].try_into().unwrap());
            if let Some(&candidate) = table.get(&key) {
                let distance = pos - candidate;
                if distance >= 1 && distance <= MAX_DISTANCE {
                    let max_len = n - pos;
                    let mut len = 0;
                    while len < max_len && input[candidate + len] == input[pos + len] {
                        len += 1;
                    }
                    if len >= MIN_MATCH {
                        found = Some((distance, len));
                    }
                }
            }
            table.insert(key, pos);
        }

        match found {
            Some((distance, match_len)) => {
                emit_sequence(&mut out, &input[literal_start..pos], Some((distance, match_len)));
                pos += match_len;
                literal_start = pos;
            }
            None => pos += 1,
        }
    }

    emit_sequence(&mut out, &input[literal_start..n], None);
    out
}

fn emit_sequence(out: &mut Vec<u8>, literals: &[u8], matched: Option<(usize, usize)>) {
    let (lit_nibble, lit_ext) = encode_length(literals.len());
    let match_nibble = match matched {
        Some((_, match_len)) => encode_length(match_len - MIN_MATCH).0,
        None => 0,
    };
    let match_ext = match matched {
        Some((_, match_len)) => encode_length(match_len - MIN_MATCH).1,
        None => Vec::new(),
    };

    out.push((lit_nibble << 4) | match_nibble);
    out.extend_from_slice(&lit_ext);
    out.extend_from_slice(literals);

    if let Some((distance, _)) = matched {
        out.extend_from_slice(&(distance as u16).to_le_bytes());
        out.extend_from_slice(&match_ext);
    }
}

fn decode(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    if data.len() < 4 {
        return Err(CompressError::Truncated);
    }
    let original_size = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    if original_size > MAX_ORIGINAL_SIZE {
        return Err(CompressError::SizeTooLarge(original_size));
    }

    let mut out = Vec::with_capacity(original_size);
    let mut pos = 4usize;

    while out.len() < original_size {
        let token = *data.get(pos).ok_or(CompressError::Truncated)?;
        pos += 1;
        let lit_nibble = token >> 4;
        let match_nibble = token & 0x0F;

        let lit_len = read_length(data, &mut pos, lit_nibble)?;
        let lit_end = pos.checked_add(lit_len).ok_or(CompressError::Truncated)?;
        let literals = data.get(pos..lit_end).ok_or(CompressError::Truncated)?;
        out.extend_from_slice(literals);
        pos = lit_end;

        if out.len() == original_size {
            break;
        }

        let offset_bytes = data.get(pos..pos + 2).ok_or(CompressError::Truncated)?;
        let offset = u16::from_le_bytes(offset_bytes.try_into().unwrap()) as usize;
        pos += 2;
        if offset == 0 {
            return Err(CompressError::ZeroOffset);
        }
        if offset > out.len() {
            return Err(CompressError::OffsetOutOfRange);
        }

        let match_len = read_length(data, &mut pos, match_nibble)? + MIN_MATCH;
        let start = out.len() - offset;
        for i in 0..match_len {
            let byte = out[start + i];
            out.push(byte);
        }
    }

    if out.len() != original_size {
        return Err(CompressError::LengthMismatch);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &[u8]) {
        let packed = compress(input);
        let recovered = decompress(&packed.data, packed.compressed).unwrap();
        assert_eq!(recovered, input);
    }

    #[test]
    fn empty_input_roundtrips() {
        roundtrip(b"");
    }

    #[test]
    fn short_input_is_not_compressed() {
        let packed = compress(b"hi");
        assert!(!packed.compressed);
        assert_eq!(packed.data, b"hi");
    }

    #[test]
    fn highly_redundant_input_compresses() {
        let input = vec![b'a'; 4096];
        let packed = compress(&input);
        assert!(packed.compressed);
        assert!(packed.data.len() < input.len());
        assert_eq!(decompress(&packed.data, true).unwrap(), input);
    }

    #[test]
    fn mixed_literal_and_match_roundtrips() {
        let mut input = Vec::new();
        for i in 0..200u32 {
            input.extend_from_slice(format!("chunk-{} ", i % 7).as_bytes());
        }
        roundtrip(&input);
    }

    #[test]
    fn overlapping_match_roundtrips() {
        // "abab..." forces matches whose offset is shorter than their length.
        let input = b"ab".repeat(64);
        roundtrip(&input);
    }

    #[test]
    fn declared_size_over_limit_is_rejected() {
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&((MAX_ORIGINAL_SIZE as u32) + 1).to_le_bytes());
        assert_eq!(decode(&data), Err(CompressError::SizeTooLarge(MAX_ORIGINAL_SIZE + 1)));
    }

    #[test]
    fn zero_offset_is_rejected() {
        // original_size=5, one literal 'a', then offset=0.
        let mut data = 5u32.to_le_bytes().to_vec();
        data.push(0x10); // 1 literal, match nibble 0
        data.push(b'a');
        data.extend_from_slice(&0u16.to_le_bytes());
        data.push(0); // match length extension irrelevant, nibble already 0 -> len 4
        assert_eq!(decode(&data), Err(CompressError::ZeroOffset));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let packed = compress(&vec![b'x'; 512]);
        assert!(packed.compressed);
        let truncated = &packed.data[..packed.data.len() - 2];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn identity_when_not_compressed() {
        let input = b"abc";
        assert_eq!(decompress(input, false).unwrap(), input);
    }
}
