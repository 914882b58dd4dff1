//! CRC-32 (IEEE 802.3, reversed polynomial `0xEDB88320`).

/// Compute the CRC-32 checksum of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
