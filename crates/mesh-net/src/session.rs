//! Post-handshake session: an AEAD duplex with monotonically increasing
//! send/recv nonce counters, bounded by age and message count.
//!
//! Nonce construction: the primitive AEAD in `mesh_core::primitives::aead`
//! uses the standard 12-byte ChaCha20-Poly1305 nonce, not XChaCha20's
//! 24-byte one. [`NonceCounter`] writes its 8-byte counter into the last 8
//! bytes of a 12-byte buffer (4 leading zero bytes) — see DESIGN.md for why
//! this is the chosen reading of "24-byte nonce" in the design notes this
//! was modeled on.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use mesh_core::primitives::{aead_decrypt, aead_encrypt, NONCE_LEN};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session message count exceeded, session must be re-handshaked")]
    Exhausted,
    #[error("session age exceeded, session must be re-handshaked")]
    Expired,
    #[error("nonce counter reached its maximum value")]
    CounterOverflow,
}

/// A typed nonce counter: increments monotonically and renders itself into
/// the 12-byte ChaCha20-Poly1305 nonce layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NonceCounter(u64);

impl NonceCounter {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Result<Self, SessionError> {
        self.0.checked_add(1).map(NonceCounter).ok_or(SessionError::CounterOverflow)
    }

    pub fn to_nonce_bytes(self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[NONCE_LEN - 8..].copy_from_slice(&self.0.to_le_bytes());
        nonce
    }
}

/// An established session's live key material and counters.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub peer_id: String,
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub send_nonce: NonceCounter,
    pub recv_nonce: NonceCounter,
    pub created_at: u64,
    pub message_count: u64,
}

/// Session state as a sum type: every operation pattern-matches against this
/// and either advances the active variant or transitions to a terminal one.
#[derive(Debug, Clone)]
pub enum Session {
    Active(ActiveSession),
    Expired,
    Exhausted,
}

impl Session {
    pub fn new(peer_id: String, send_key: [u8; 32], recv_key: [u8; 32], created_at: u64) -> Self {
        Session::Active(ActiveSession {
            peer_id,
            send_key,
            recv_key,
            send_nonce: NonceCounter::default(),
            recv_nonce: NonceCounter::default(),
            created_at,
            message_count: 0,
        })
    }

    fn check_bounds(active: &ActiveSession, now_ms: u64, max_age_ms: u64, max_message_count: u64) -> Option<Session> {
        if now_ms.saturating_sub(active.created_at) > max_age_ms {
            tracing::debug!(peer_id = %active.peer_id, "session expired");
            return Some(Session::Expired);
        }
        if active.message_count >= max_message_count {
            tracing::debug!(peer_id = %active.peer_id, "session exhausted");
            return Some(Session::Exhausted);
        }
        None
    }

    /// Encrypt `plaintext`. Advances the send counter on success.
    pub fn encrypt(&mut self, aad: &[u8], plaintext: &[u8], now_ms: u64, max_age_ms: u64, max_message_count: u64) -> Result<Vec<u8>, SessionError> {
        let active = match self {
            Session::Active(active) => active,
            Session::Expired => return Err(SessionError::Expired),
            Session::Exhausted => return Err(SessionError::Exhausted),
        };

        if let Some(terminal) = Self::check_bounds(active, now_ms, max_age_ms, max_message_count) {
            *self = terminal;
            return match self {
                Session::Expired => Err(SessionError::Expired),
                Session::Exhausted => Err(SessionError::Exhausted),
                Session::Active(_) => unreachable!(),
            };
        }

        let nonce = active.send_nonce.to_nonce_bytes();
        let ciphertext = aead_encrypt(&active.send_key, &nonce, aad, plaintext);
        active.send_nonce = active.send_nonce.next()?;
        active.message_count += 1;
        Ok(ciphertext)
    }

    /// Decrypt `ciphertext`. Returns `Ok(None)` on authentication failure —
    /// the caller distinguishes "not for us" from "for us, corrupt" by the
    /// fact that a session exists at all, not by error type.
    pub fn decrypt(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Option<Vec<u8>>, SessionError> {
        let active = match self {
            Session::Active(active) => active,
            Session::Expired => return Err(SessionError::Expired),
            Session::Exhausted => return Err(SessionError::Exhausted),
        };

        let nonce = active.recv_nonce.to_nonce_bytes();
        match aead_decrypt(&active.recv_key, &nonce, aad, ciphertext) {
            Ok(plaintext) => {
                active.recv_nonce = active.recv_nonce.next()?;
                Ok(Some(plaintext))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Session::Active(_))
    }

    /// Serialize key material and counter state for export.
    pub fn export(&self) -> Option<SessionExport> {
        match self {
            Session::Active(active) => Some(SessionExport {
                peer_id: active.peer_id.clone(),
                send_key: active.send_key,
                recv_key: active.recv_key,
                send_nonce: active.send_nonce.value(),
                recv_nonce: active.recv_nonce.value(),
                created_at: active.created_at,
                message_count: active.message_count,
            }),
            _ => None,
        }
    }

    /// Reconstitute an exported session with identical counter state.
    pub fn import(export: SessionExport) -> Self {
        Session::Active(ActiveSession {
            peer_id: export.peer_id,
            send_key: export.send_key,
            recv_key: export.recv_key,
            send_nonce: NonceCounter(export.send_nonce),
            recv_nonce: NonceCounter(export.recv_nonce),
            created_at: export.created_at,
            message_count: export.message_count,
        })
    }
}

/// Exportable snapshot of a session's key material and counters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionExport {
    pub peer_id: String,
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub send_nonce: u64,
    pub recv_nonce: u64,
    pub created_at: u64,
    pub message_count: u64,
}

/// One session per peer-id.
pub type SessionTable = Arc<DashMap<String, Session>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
