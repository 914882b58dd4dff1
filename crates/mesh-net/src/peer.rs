//! Peer registry — tracks nearby peers and their connection lifecycle.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// A peer's position in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    Securing,
    Secured,
}

/// Tracked state for a discovered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer_id: String,
    pub static_public_key: Option<[u8; 32]>,
    pub display_name: Option<String>,
    /// Received-signal-strength indicator, when the transport supplies one.
    pub rssi: Option<i8>,
    pub hop_distance: u8,
    pub connection_state: ConnectionState,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl PeerEntry {
    pub fn new(peer_id: impl Into<String>, now_ms: u64) -> Self {
        Self {
            peer_id: peer_id.into(),
            static_public_key: None,
            display_name: None,
            rssi: None,
            hop_distance: 0,
            connection_state: ConnectionState::Discovering,
            first_seen: now_ms,
            last_seen: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen = now_ms;
    }

    pub fn is_stale(&self, now_ms: u64, peer_timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) > peer_timeout_ms
    }
}

/// The peer table — shared across handshake, routing, and orchestrator tasks.
/// Keyed on peer-id.
pub type PeerTable = Arc<DashMap<String, PeerEntry>>;

pub fn new_peer_table() -> PeerTable {
    Arc::new(DashMap::new())
}

/// Remove peers that have not been heard from within `peer_timeout_ms`.
/// Returns the removed peer-ids.
pub fn remove_stale(table: &PeerTable, now_ms: u64, peer_timeout_ms: u64) -> Vec<String> {
    let stale: Vec<String> = table
        .iter()
        .filter(|entry| entry.value().is_stale(now_ms, peer_timeout_ms))
        .map(|entry| entry.key().clone())
        .collect();
    for peer_id in &stale {
        table.remove(peer_id);
    }
    stale
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
