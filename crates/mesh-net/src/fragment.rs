//! Fragmentation: split oversize payloads for the negotiated MTU, and
//! reassemble fragments back into a single payload on the receive side.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment index {index} is outside [0, {total})")]
    IndexOutOfRange { index: u8, total: u8 },
    #[error("fragment_total must be at least 2")]
    TotalTooSmall,
}

/// Split `payload` into fragments no larger than `mtu`. Returns a single
/// fragment-list of length 1 (without the fragment flag semantics applying)
/// when the payload already fits.
pub fn split(payload: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    if payload.len() <= mtu {
        return vec![payload.to_vec()];
    }
    payload.chunks(mtu).map(|chunk| chunk.to_vec()).collect()
}

/// Accumulates fragments for one in-flight message, keyed by index.
pub struct FragmentAssembly {
    pub message_id: [u8; 16],
    pub total: u8,
    received: BTreeMap<u8, Vec<u8>>,
    pub first_seen_at: u64,
}

impl FragmentAssembly {
    pub fn new(message_id: [u8; 16], total: u8, now_ms: u64) -> Self {
        Self {
            message_id,
            total,
            received: BTreeMap::new(),
            first_seen_at: now_ms,
        }
    }

    /// Insert one fragment. Re-inserting the same index is idempotent (the
    /// first copy wins). Returns an error for an index outside `[0, total)`.
    pub fn insert(&mut self, index: u8, bytes: Vec<u8>) -> Result<(), FragmentError> {
        if self.total < 2 {
            return Err(FragmentError::TotalTooSmall);
        }
        if index >= self.total {
            return Err(FragmentError::IndexOutOfRange {
                index,
                total: self.total,
            });
        }
        self.received.entry(index).or_insert(bytes);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }

    pub fn has_timed_out(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.first_seen_at) > timeout_ms
    }

    /// Concatenate fragments in index order. Only meaningful once complete.
    pub fn reassemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut out = Vec::new();
        for index in 0..self.total {
            out.extend_from_slice(self.received.get(&index)?);
        }
        Some(out)
    }
}

/// Tracks all in-flight reassemblies, keyed by message-id.
pub struct Reassembler {
    assemblies: std::collections::HashMap<[u8; 16], FragmentAssembly>,
    timeout_ms: u64,
}

impl Reassembler {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            assemblies: std::collections::HashMap::new(),
            timeout_ms,
        }
    }

    /// Feed one fragment in. Returns the reconstituted payload once complete.
    pub fn receive_fragment(
        &mut self,
        message_id: [u8; 16],
        index: u8,
        total: u8,
        bytes: Vec<u8>,
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let assembly = self
            .assemblies
            .entry(message_id)
            .or_insert_with(|| FragmentAssembly::new(message_id, total, now_ms));
        assembly.insert(index, bytes)?;

        if assembly.is_complete() {
            let payload = assembly.reassemble();
            self.assemblies.remove(&message_id);
            Ok(payload)
        } else {
            Ok(None)
        }
    }

    /// Drop any assembly that has exceeded the reassembly timeout.
    pub fn sweep_timeouts(&mut self, now_ms: u64) -> Vec<[u8; 16]> {
        let expired: Vec<[u8; 16]> = self
            .assemblies
            .iter()
            .filter(|(_, assembly)| assembly.has_timed_out(now_ms, self.timeout_ms))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.assemblies.remove(id);
        }
        expired
    }
}
