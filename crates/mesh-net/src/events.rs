//! Event bus: a typed event enum delivered over a bounded broadcast channel
//! the application drains on its own task, rather than synchronous
//! in-process emission.

use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    Expired,
    MaxHops,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionChangeReason {
    Blocked,
    Unblocked,
    Disconnected,
}

/// Everything the core reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialized,
    StateChanged { old: String, new: String },
    PeerDiscovered { peer_id: String },
    PeerConnected { peer_id: String },
    PeerDisconnected { peer_id: String, reason: String },
    PeerBlocked { peer_id: String },
    PeerUnblocked { peer_id: String },
    PeerSecured { peer_id: String },
    HandshakeStarted { peer_id: String },
    HandshakeProgress { peer_id: String, step: String },
    HandshakeComplete { peer_id: String, remote_static_public_key: Option<[u8; 32]>, elapsed_ms: u64 },
    HandshakeFailed { peer_id: String, reason: String },
    MessageReceived { message_id: [u8; 16] },
    MessageRelayed { message_id: [u8; 16] },
    MessageDropped { message_id: [u8; 16], reason: DropReason },
    PrivateMessageSent { peer_id: String, message_id: [u8; 16] },
    PrivateMessageReceived { peer_id: String, message_id: [u8; 16] },
    BroadcastSent { message_id: [u8; 16] },
    BroadcastReceived { message_id: [u8; 16] },
    ChannelJoined { channel_id: String },
    ChannelLeft { channel_id: String },
    ChannelMessage { channel_id: String, message_id: [u8; 16] },
    CachedMessagesDelivered { peer_id: String, count: usize },
    Error { message: String },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Enqueue an event. Returns the number of active subscribers it reached;
    /// a channel with no subscribers yet simply drops the event.
    pub fn emit(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
