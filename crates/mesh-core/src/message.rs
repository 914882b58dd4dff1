//! The `Message` entity: an owned header plus its payload.

use crate::wire::{
    self, HeaderFields, MessageType, ParsedHeader, WireError, FLAG_ENCRYPTED, FLAG_IS_BROADCAST,
    FLAG_IS_FRAGMENT, FLAG_REQUIRES_ACK,
};

/// One wire-level message: an owned header plus a contiguous payload buffer.
/// Immutable except for `hop_count`, which a forwarder mutates in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: ParsedHeader,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(fields: HeaderFields, payload: Vec<u8>) -> Result<Self, WireError> {
        let bytes = wire::serialize(&fields, &payload)?;
        wire::deserialize(&bytes).map(|frame| Message {
            header: frame.header,
            payload: frame.payload,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        wire::deserialize(data).map(|frame| Message {
            header: frame.header,
            payload: frame.payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let fields = HeaderFields {
            message_type: self.header.message_type,
            flags: self.header.flags,
            hop_count: self.header.hop_count,
            max_hops: self.header.max_hops,
            message_id: self.header.message_id,
            timestamp_ms: self.header.timestamp_ms,
            expires_at_ms: self.header.expires_at_ms,
            payload_length: self.header.payload_length,
            fragment_index: self.header.fragment_index,
            fragment_total: self.header.fragment_total,
        };
        wire::serialize_header(&fields)
            .into_iter()
            .chain(self.payload.clone())
            .collect()
    }

    pub fn message_type(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.header.message_type)
    }

    pub fn is_fragment(&self) -> bool {
        self.header.flags & FLAG_IS_FRAGMENT != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.header.flags & FLAG_IS_BROADCAST != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.flags & FLAG_ENCRYPTED != 0
    }

    pub fn requires_ack(&self) -> bool {
        self.header.flags & FLAG_REQUIRES_ACK != 0
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.header.is_expired(now_ms)
    }

    /// Increment `hop_count` in place, as a forwarder does before relaying.
    pub fn increment_hop_count(&mut self) {
        self.header.hop_count = self.header.hop_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FLAG_IS_BROADCAST;

    fn fields(flags: u8, now: u64) -> HeaderFields {
        HeaderFields {
            message_type: MessageType::Text as u8,
            flags,
            hop_count: 0,
            max_hops: 7,
            message_id: HeaderFields::new_message_id(),
            timestamp_ms: now,
            expires_at_ms: now + 60_000,
            payload_length: 5,
            fragment_index: 0,
            fragment_total: 1,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let msg = Message::new(fields(0, 1_000), b"hello".to_vec()).unwrap();
        let bytes = msg.to_bytes();
        let recovered = Message::from_bytes(&bytes).unwrap();
        assert_eq!(recovered, msg);
    }

    #[test]
    fn derived_queries_reflect_flags() {
        let msg = Message::new(fields(FLAG_IS_BROADCAST, 1_000), b"hello".to_vec()).unwrap();
        assert!(msg.is_broadcast());
        assert!(!msg.is_encrypted());
        assert!(!msg.is_fragment());
    }

    #[test]
    fn is_expired_compares_against_now() {
        let msg = Message::new(fields(0, 1_000), b"hello".to_vec()).unwrap();
        assert!(!msg.is_expired(1_000));
        assert!(msg.is_expired(100_000));
    }

    #[test]
    fn increment_hop_count_mutates_in_place() {
        let mut msg = Message::new(fields(0, 1_000), b"hello".to_vec()).unwrap();
        assert_eq!(msg.header.hop_count, 0);
        msg.increment_hop_count();
        assert_eq!(msg.header.hop_count, 1);
    }
}
