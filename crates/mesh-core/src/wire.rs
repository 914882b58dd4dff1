//! Mesh wire format — the 48-byte message header and its framing rules.
//!
//! Every field, every reserved byte, and the checksum placement are part of
//! the wire contract. The header type is `#[repr(C, packed)]` with
//! `zerocopy` derives for allocation-free (de)serialization; there is no
//! unsafe code in this module. Serialize/deserialize instead work over plain
//! byte slices in big-endian order, since the checksum and batch-parsing
//! rules are easier to express against a byte buffer than a typed struct.

use static_assertions::assert_eq_size;
use thiserror::Error;
use uuid::Uuid;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::primitives::crc32;

pub const HEADER_LEN: usize = 48;
pub const MAX_MESSAGE_SIZE: usize = 65535;
pub const CURRENT_VERSION: u8 = 1;

/// In-memory layout of the 48-byte header, fields already in their on-wire
/// (big-endian) byte order. Callers copy packed fields to locals before
/// comparing, to avoid unaligned references.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct MessageHeader {
    pub version: u8,
    pub message_type: u8,
    pub flags: u8,
    pub hop_count: u8,
    pub max_hops: u8,
    pub reserved: [u8; 3],
    pub message_id: [u8; 16],
    pub timestamp: [u8; 8],
    pub expires_at: [u8; 8],
    pub payload_length: [u8; 2],
    pub fragment_index: u8,
    pub fragment_total: u8,
    pub checksum: [u8; 4],
}

assert_eq_size!(MessageHeader, [u8; HEADER_LEN]);

// ── Flags ─────────────────────────────────────────────────────────────────────

pub const FLAG_ENCRYPTED: u8 = 1 << 0;
pub const FLAG_REQUIRES_ACK: u8 = 1 << 1;
pub const FLAG_IS_BROADCAST: u8 = 1 << 2;
pub const FLAG_IS_FRAGMENT: u8 = 1 << 3;
pub const FLAG_HIGH_PRIORITY: u8 = 1 << 4;
pub const FLAG_IS_COMPRESSED: u8 = 1 << 5;

// ── Message types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Text = 0x01,
    PrivateMessage = 0x02,
    ChannelMessage = 0x03,
    HandshakeInit = 0x04,
    HandshakeResponse = 0x05,
    HandshakeFinal = 0x06,
    PeerAnnounce = 0x07,
    PeerRequest = 0x08,
    PeerResponse = 0x09,
    Heartbeat = 0x0a,
    Fragment = 0x0b,
    ReadReceipt = 0x0c,
}

impl MessageType {
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageType::HandshakeInit
                | MessageType::HandshakeResponse
                | MessageType::HandshakeFinal
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Text),
            0x02 => Ok(MessageType::PrivateMessage),
            0x03 => Ok(MessageType::ChannelMessage),
            0x04 => Ok(MessageType::HandshakeInit),
            0x05 => Ok(MessageType::HandshakeResponse),
            0x06 => Ok(MessageType::HandshakeFinal),
            0x07 => Ok(MessageType::PeerAnnounce),
            0x08 => Ok(MessageType::PeerRequest),
            0x09 => Ok(MessageType::PeerResponse),
            0x0a => Ok(MessageType::Heartbeat),
            0x0b => Ok(MessageType::Fragment),
            0x0c => Ok(MessageType::ReadReceipt),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("input too short to contain a header")]
    InvalidFormat,
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("payload length {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    PayloadTooLarge(usize),
    #[error("unknown message type byte: 0x{0:02x}")]
    UnknownMessageType(u8),
}

// ── Construction ──────────────────────────────────────────────────────────────

pub struct HeaderFields {
    pub message_type: u8,
    pub flags: u8,
    pub hop_count: u8,
    pub max_hops: u8,
    pub message_id: [u8; 16],
    pub timestamp_ms: u64,
    pub expires_at_ms: u64,
    pub payload_length: u16,
    pub fragment_index: u8,
    pub fragment_total: u8,
}

impl HeaderFields {
    pub fn new_message_id() -> [u8; 16] {
        *Uuid::new_v4().as_bytes()
    }
}

/// Build and serialize a header, computing the CRC-32 over bytes 0..43 last
/// and writing it at offset 44.
pub fn serialize_header(fields: &HeaderFields) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    buf[0] = CURRENT_VERSION;
    buf[1] = fields.message_type;
    buf[2] = fields.flags;
    buf[3] = fields.hop_count;
    buf[4] = fields.max_hops;
    // bytes 5..8 reserved, left zero
    buf[8..24].copy_from_slice(&fields.message_id);
    buf[24..32].copy_from_slice(&fields.timestamp_ms.to_be_bytes());
    buf[32..40].copy_from_slice(&fields.expires_at_ms.to_be_bytes());
    buf[40..42].copy_from_slice(&fields.payload_length.to_be_bytes());
    buf[42] = fields.fragment_index;
    buf[43] = fields.fragment_total;
    let checksum = crc32(&buf[0..44]);
    buf[44..48].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// A parsed header with fields exposed in host-friendly form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u8,
    pub message_type: u8,
    pub flags: u8,
    pub hop_count: u8,
    pub max_hops: u8,
    pub message_id: [u8; 16],
    pub timestamp_ms: u64,
    pub expires_at_ms: u64,
    pub payload_length: u16,
    pub fragment_index: u8,
    pub fragment_total: u8,
}

impl ParsedHeader {
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_IS_BROADCAST != 0
    }
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
    pub fn is_fragment(&self) -> bool {
        self.flags & FLAG_IS_FRAGMENT != 0
    }
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_IS_COMPRESSED != 0
    }
    pub fn requires_ack(&self) -> bool {
        self.flags & FLAG_REQUIRES_ACK != 0
    }
    pub fn is_high_priority(&self) -> bool {
        self.flags & FLAG_HIGH_PRIORITY != 0
    }
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

pub fn deserialize_header(data: &[u8]) -> Result<ParsedHeader, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::InvalidFormat);
    }
    let header = &data[..HEADER_LEN];
    let expected = crc32(&header[0..44]);
    let actual = u32::from_be_bytes(header[44..48].try_into().unwrap());
    if expected != actual {
        return Err(WireError::InvalidChecksum);
    }

    Ok(ParsedHeader {
        version: header[0],
        message_type: header[1],
        flags: header[2],
        hop_count: header[3],
        max_hops: header[4],
        message_id: header[8..24].try_into().unwrap(),
        timestamp_ms: u64::from_be_bytes(header[24..32].try_into().unwrap()),
        expires_at_ms: u64::from_be_bytes(header[32..40].try_into().unwrap()),
        payload_length: u16::from_be_bytes(header[40..42].try_into().unwrap()),
        fragment_index: header[42],
        fragment_total: header[43],
    })
}

/// A fully parsed frame: header plus its payload slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub header: ParsedHeader,
    pub payload: Vec<u8>,
}

pub fn serialize(fields: &HeaderFields, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    let mut out = serialize_header(fields);
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn deserialize(data: &[u8]) -> Result<ParsedFrame, WireError> {
    let header = deserialize_header(data)?;
    let total_len = HEADER_LEN + header.payload_length as usize;
    if data.len() < total_len {
        return Err(WireError::InvalidFormat);
    }
    Ok(ParsedFrame {
        payload: data[HEADER_LEN..total_len].to_vec(),
        header,
    })
}

/// Parse as many complete frames as `data` holds, stopping silently (never
/// raising) at the first incomplete or invalid entry.
pub fn deserialize_batch(data: &[u8]) -> Vec<ParsedFrame> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match deserialize(&data[offset..]) {
            Ok(frame) => {
                offset += HEADER_LEN + frame.header.payload_length as usize;
                out.push(frame);
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields(payload_length: u16) -> HeaderFields {
        HeaderFields {
            message_type: MessageType::Text as u8,
            flags: FLAG_REQUIRES_ACK,
            hop_count: 0,
            max_hops: 7,
            message_id: [0x42; 16],
            timestamp_ms: 1_700_000_000_000,
            expires_at_ms: 1_700_000_060_000,
            payload_length,
            fragment_index: 0,
            fragment_total: 1,
        }
    }

    #[test]
    fn header_round_trip() {
        let fields = sample_fields(5);
        let payload = b"hello";
        let frame = serialize(&fields, payload).unwrap();
        let parsed = deserialize(&frame).unwrap();

        assert_eq!(parsed.header.version, CURRENT_VERSION);
        assert_eq!(parsed.header.message_type, MessageType::Text as u8);
        assert_eq!(parsed.header.flags, FLAG_REQUIRES_ACK);
        assert_eq!(parsed.header.message_id, [0x42; 16]);
        assert_eq!(parsed.header.payload_length, 5);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let fields = sample_fields(0);
        let frame = serialize(&fields, b"").unwrap();
        let parsed = deserialize(&frame).unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn every_flag_combination_round_trips() {
        for flags in 0u8..64 {
            let mut fields = sample_fields(3);
            fields.flags = flags;
            let frame = serialize(&fields, b"abc").unwrap();
            let parsed = deserialize_header(&frame).unwrap();
            assert_eq!(parsed.flags, flags);
        }
    }

    #[test]
    fn truncated_header_is_invalid_format() {
        let fields = sample_fields(0);
        let frame = serialize(&fields, b"").unwrap();
        assert_eq!(
            deserialize_header(&frame[..HEADER_LEN - 1]),
            Err(WireError::InvalidFormat)
        );
    }

    #[test]
    fn truncated_payload_is_invalid_format() {
        let fields = sample_fields(5);
        let frame = serialize(&fields, b"hello").unwrap();
        assert_eq!(
            deserialize(&frame[..frame.len() - 1]),
            Err(WireError::InvalidFormat)
        );
    }

    #[test]
    fn flipping_any_byte_breaks_checksum() {
        let fields = sample_fields(3);
        let frame = serialize(&fields, b"abc").unwrap();
        for i in 0..HEADER_LEN {
            let mut tampered = frame.clone();
            tampered[i] ^= 0xFF;
            assert_eq!(
                deserialize_header(&tampered),
                Err(WireError::InvalidChecksum)
            );
        }
    }

    #[test]
    fn payload_too_large_rejected_at_serialize() {
        let fields = sample_fields(0);
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert_eq!(
            serialize(&fields, &oversized),
            Err(WireError::PayloadTooLarge(MAX_MESSAGE_SIZE + 1))
        );
    }

    #[test]
    fn batch_stops_at_first_incomplete_entry() {
        let f1 = serialize(&sample_fields(3), b"abc").unwrap();
        let f2 = serialize(&sample_fields(2), b"de").unwrap();
        let mut data = f1.clone();
        data.extend_from_slice(&f2);
        data.extend_from_slice(&[0u8; 10]); // trailing junk, incomplete frame

        let frames = deserialize_batch(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"abc");
        assert_eq!(frames[1].payload, b"de");
    }

    #[test]
    fn message_type_round_trip() {
        for raw in 0x01u8..=0x0c {
            let ty = MessageType::try_from(raw).unwrap();
            assert_eq!(u8::from(ty), raw);
        }
        assert!(MessageType::try_from(0xff).is_err());
    }

    #[test]
    fn handshake_types_are_identified() {
        assert!(MessageType::HandshakeInit.is_handshake());
        assert!(MessageType::HandshakeResponse.is_handshake());
        assert!(MessageType::HandshakeFinal.is_handshake());
        assert!(!MessageType::Text.is_handshake());
    }

    #[test]
    fn packed_struct_size_is_48() {
        assert_eq!(std::mem::size_of::<MessageHeader>(), HEADER_LEN);
    }
}
