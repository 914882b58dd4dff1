//! The transport contract: consumed by the orchestrator, implemented by a
//! physical radio adapter (out of core scope). An in-memory mock is
//! provided for integration tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("transport is not started")]
    NotStarted,
    #[error("send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub interval_ms: u32,
    pub window_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Active,
    Balanced,
    LowPower,
}

/// Events a transport emits upward, opaque to the wire format it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerConnected { peer_id: String, rssi: Option<i8> },
    PeerDisconnected { peer_id: String, reason: String },
    Message { peer_id: String, data: Vec<u8> },
}

/// A small-datagram transport. Datagrams are opaque byte sequences; the
/// transport does not interpret or reorder payloads beyond best effort.
pub trait Transport: Send + Sync {
    fn start(&self) -> BoxFuture<'_, Result<(), TransportError>>;
    fn stop(&self) -> BoxFuture<'_, Result<(), TransportError>>;
    fn send(&self, peer_id: &str, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>>;
    fn broadcast(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>>;
    fn set_scan_parameters(&self, params: ScanParameters);
    fn set_power_mode(&self, mode: PowerMode);
}

/// An in-memory transport for tests: peers are wired together explicitly via
/// [`MockNetwork`], and sends are delivered by pushing onto the recipient's
/// event channel.
pub struct MockTransport {
    local_peer_id: String,
    network: Arc<MockNetwork>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Shared fabric wiring a set of [`MockTransport`]s together.
pub struct MockNetwork {
    peers: dashmap::DashMap<String, mpsc::UnboundedSender<TransportEvent>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: dashmap::DashMap::new(),
        })
    }

    /// Create a transport for `peer_id` wired into this network, returning
    /// it plus the event receiver the orchestrator polls.
    pub fn create_transport(
        self: &Arc<Self>,
        peer_id: impl Into<String>,
    ) -> (MockTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(peer_id.clone(), tx.clone());
        (
            MockTransport {
                local_peer_id: peer_id,
                network: Arc::clone(self),
                events_tx: tx,
            },
            rx,
        )
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self {
            peers: dashmap::DashMap::new(),
        }
    }
}

impl Transport for MockTransport {
    fn start(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async { Ok(()) })
    }

    fn send(&self, peer_id: &str, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        let peer_id = peer_id.to_string();
        let local = self.local_peer_id.clone();
        let network = Arc::clone(&self.network);
        Box::pin(async move {
            let recipient = network
                .peers
                .get(&peer_id)
                .ok_or_else(|| TransportError::UnknownPeer(peer_id.clone()))?;
            recipient
                .send(TransportEvent::Message { peer_id: local, data: bytes })
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
    }

    fn broadcast(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        let local = self.local_peer_id.clone();
        let network = Arc::clone(&self.network);
        Box::pin(async move {
            for entry in network.peers.iter() {
                if *entry.key() == local {
                    continue;
                }
                let _ = entry.value().send(TransportEvent::Message {
                    peer_id: local.clone(),
                    data: bytes.clone(),
                });
            }
            Ok(())
        })
    }

    fn set_scan_parameters(&self, _params: ScanParameters) {}

    fn set_power_mode(&self, _mode: PowerMode) {}
}

impl MockTransport {
    /// Announce this peer's presence to the rest of the mock network.
    pub fn announce_connected(&self, rssi: Option<i8>) {
        let _ = self.events_tx.send(TransportEvent::PeerConnected {
            peer_id: self.local_peer_id.clone(),
            rssi,
        });
    }
}
