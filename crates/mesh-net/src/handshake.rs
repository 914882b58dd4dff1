//! Noise-XX-style three-message handshake, hand-rolled from raw primitives
//! rather than a full Noise implementation: the wire contract here only
//! carries ephemeral public keys, and the "final" message is the
//! initiator's ephemeral key echoed back as a weak confirmation rather than
//! a key-confirmation MAC. See DESIGN.md for why that weakness is kept.
//!
//! At most one pending handshake per peer. A local initiator racing an
//! incoming `HANDSHAKE_INIT` from the same peer is resolved by comparing the
//! local static public key against the remote peer-id.

use std::collections::HashMap;
use thiserror::Error;

use mesh_core::primitives::{derive, EphemeralKeypair};

const EPHEMERAL_KEY_LEN: usize = 32;
const SEND_INFO: &[u8] = &[0x01];
const RECV_INFO: &[u8] = &[0x02];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake message too short")]
    TooShort,
    #[error("no pending handshake for this peer")]
    NoPendingHandshake,
    #[error("handshake message arrived out of sequence for the current step")]
    InvalidState,
    #[error("final confirmation did not match the initiator's ephemeral key")]
    ConfirmationMismatch,
    #[error("a handshake is already in progress with this peer")]
    AlreadyInProgress,
    #[error("handshake timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    InitiatorWaiting2,
    RespWaiting3,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakOutcome {
    /// The local side yields: cancel its own initiator and accept the
    /// incoming message as a responder.
    LocalYields,
    /// The local side wins: reject the incoming init.
    LocalWins,
}

/// Compare the local static public key against the remote peer-id,
/// lexicographically on the canonical byte form. The lower side yields.
pub fn resolve_tie_break(local_static_public_key: &[u8; 32], remote_peer_id: &str) -> TieBreakOutcome {
    if local_static_public_key.as_slice() < remote_peer_id.as_bytes() {
        TieBreakOutcome::LocalYields
    } else {
        TieBreakOutcome::LocalWins
    }
}

/// Derived session keys plus metadata for the caller to install a session.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub peer_id: String,
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub elapsed_ms: u64,
}

struct PendingHandshake {
    peer_id: String,
    role: HandshakeRole,
    ephemeral: Option<EphemeralKeypair>,
    ephemeral_public: [u8; 32],
    remote_ephemeral: Option<[u8; 32]>,
    step: HandshakeStep,
    started_at: u64,
    pending_keys: Option<([u8; 32], [u8; 32])>,
}

fn derive_pair(shared_secret: &[u8; 32], send_info: &[u8], recv_info: &[u8]) -> ([u8; 32], [u8; 32]) {
    let send_key: [u8; 32] = derive(&[], shared_secret.as_slice(), send_info, 32)
        .expect("32-byte output is well within HKDF's bound")
        .try_into()
        .unwrap();
    let recv_key: [u8; 32] = derive(&[], shared_secret.as_slice(), recv_info, 32)
        .expect("32-byte output is well within HKDF's bound")
        .try_into()
        .unwrap();
    (send_key, recv_key)
}

/// Tracks at most one pending handshake per peer. All transitions go through
/// this single mutator type.
pub struct HandshakeManager {
    pending: HashMap<String, PendingHandshake>,
    timeout_ms: u64,
}

impl HandshakeManager {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            timeout_ms,
        }
    }

    /// Start a handshake as initiator. Returns the `HANDSHAKE_INIT` payload.
    pub fn initiate(&mut self, peer_id: &str, now_ms: u64) -> Result<Vec<u8>, HandshakeError> {
        if self.pending.contains_key(peer_id) {
            return Err(HandshakeError::AlreadyInProgress);
        }
        let ephemeral = EphemeralKeypair::generate();
        let public = ephemeral.public;
        self.pending.insert(
            peer_id.to_string(),
            PendingHandshake {
                peer_id: peer_id.to_string(),
                role: HandshakeRole::Initiator,
                ephemeral: Some(ephemeral),
                ephemeral_public: public,
                remote_ephemeral: None,
                step: HandshakeStep::InitiatorWaiting2,
                started_at: now_ms,
                pending_keys: None,
            },
        );
        Ok(public.to_vec())
    }

    /// Handle an incoming `HANDSHAKE_INIT`. Applies the tie-break if a local
    /// initiator is already pending for this peer.
    pub fn on_init(&mut self, peer_id: &str, bytes: &[u8], local_static_public_key: &[u8; 32], now_ms: u64) -> Result<Vec<u8>, HandshakeError> {
        if bytes.len() < EPHEMERAL_KEY_LEN {
            return Err(HandshakeError::TooShort);
        }

        if let Some(existing) = self.pending.get(peer_id) {
            match existing.role {
                HandshakeRole::Initiator => match resolve_tie_break(local_static_public_key, peer_id) {
                    TieBreakOutcome::LocalWins => return Err(HandshakeError::AlreadyInProgress),
                    TieBreakOutcome::LocalYields => {
                        self.pending.remove(peer_id);
                    }
                },
                HandshakeRole::Responder => return Err(HandshakeError::AlreadyInProgress),
            }
        }

        let mut initiator_ephemeral_pub = [0u8; 32];
        initiator_ephemeral_pub.copy_from_slice(&bytes[..EPHEMERAL_KEY_LEN]);

        let responder_ephemeral = EphemeralKeypair::generate();
        let response_public = responder_ephemeral.public;
        let shared_secret = responder_ephemeral.diffie_hellman(&initiator_ephemeral_pub);
        let (send_key, recv_key) = derive_pair(&shared_secret, RECV_INFO, SEND_INFO);

        self.pending.insert(
            peer_id.to_string(),
            PendingHandshake {
                peer_id: peer_id.to_string(),
                role: HandshakeRole::Responder,
                ephemeral: None,
                ephemeral_public: response_public,
                remote_ephemeral: Some(initiator_ephemeral_pub),
                step: HandshakeStep::RespWaiting3,
                started_at: now_ms,
                pending_keys: Some((send_key, recv_key)),
            },
        );

        Ok(response_public.to_vec())
    }

    /// Handle an incoming `HANDSHAKE_RESPONSE` as initiator. Returns the
    /// `HANDSHAKE_FINAL` payload and the resulting session keys.
    pub fn on_response(&mut self, peer_id: &str, bytes: &[u8], now_ms: u64) -> Result<(Vec<u8>, HandshakeResult), HandshakeError> {
        if bytes.len() < EPHEMERAL_KEY_LEN {
            return Err(HandshakeError::TooShort);
        }
        let pending = self.pending.get_mut(peer_id).ok_or(HandshakeError::NoPendingHandshake)?;
        if pending.role != HandshakeRole::Initiator || pending.step != HandshakeStep::InitiatorWaiting2 {
            self.fail(peer_id);
            return Err(HandshakeError::InvalidState);
        }

        let mut responder_ephemeral_pub = [0u8; 32];
        responder_ephemeral_pub.copy_from_slice(&bytes[..EPHEMERAL_KEY_LEN]);

        let ephemeral = pending.ephemeral.take().expect("initiator always holds its ephemeral until this step");
        let initiator_public = pending.ephemeral_public;
        let started_at = pending.started_at;
        let shared_secret = ephemeral.diffie_hellman(&responder_ephemeral_pub);
        let (send_key, recv_key) = derive_pair(&shared_secret, SEND_INFO, RECV_INFO);

        self.pending.remove(peer_id);

        let result = HandshakeResult {
            peer_id: peer_id.to_string(),
            send_key,
            recv_key,
            elapsed_ms: now_ms.saturating_sub(started_at),
        };
        Ok((initiator_public.to_vec(), result))
    }

    /// Handle an incoming `HANDSHAKE_FINAL` as responder. Returns the
    /// resulting session keys.
    pub fn on_final(&mut self, peer_id: &str, bytes: &[u8], now_ms: u64) -> Result<HandshakeResult, HandshakeError> {
        if bytes.len() < EPHEMERAL_KEY_LEN {
            return Err(HandshakeError::TooShort);
        }
        let pending = self.pending.get(peer_id).ok_or(HandshakeError::NoPendingHandshake)?;
        if pending.role != HandshakeRole::Responder || pending.step != HandshakeStep::RespWaiting3 {
            self.fail(peer_id);
            return Err(HandshakeError::InvalidState);
        }

        let expected = pending.remote_ephemeral.expect("responder always records the initiator's ephemeral at message 1");
        if &bytes[..EPHEMERAL_KEY_LEN] != expected.as_slice() {
            self.fail(peer_id);
            return Err(HandshakeError::ConfirmationMismatch);
        }

        let (send_key, recv_key) = pending.pending_keys.expect("responder derives keys at message 2");
        let started_at = pending.started_at;
        self.pending.remove(peer_id);

        Ok(HandshakeResult {
            peer_id: peer_id.to_string(),
            send_key,
            recv_key,
            elapsed_ms: now_ms.saturating_sub(started_at),
        })
    }

    fn fail(&mut self, peer_id: &str) {
        if let Some(pending) = self.pending.get_mut(peer_id) {
            pending.step = HandshakeStep::Failed;
        }
        self.pending.remove(peer_id);
    }

    pub fn cancel(&mut self, peer_id: &str) {
        self.pending.remove(peer_id);
    }

    pub fn sweep_timeouts(&mut self, now_ms: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| now_ms.saturating_sub(pending.started_at) > self.timeout_ms)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        for peer_id in &expired {
            self.pending.remove(peer_id);
        }
        expired
    }

    pub fn has_pending(&self, peer_id: &str) -> bool {
        self.pending.contains_key(peer_id)
    }
}
