//! Store-and-forward cache: a per-recipient FIFO bounded by a per-recipient
//! cap and a global cap, with a retention TTL.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreForwardError {
    #[error("recipient id must not be empty")]
    InvalidRecipient,
    #[error("payload must not be empty")]
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub recipient_id: String,
    pub message_id: [u8; 16],
    pub payload: Vec<u8>,
    pub created_at: u64,
    pub expires_at: u64,
}

pub struct StoreForwardCache {
    per_recipient: HashMap<String, VecDeque<CacheEntry>>,
    total: usize,
    max_per_recipient: usize,
    max_total_messages: usize,
    retention_ms: u64,
}

impl StoreForwardCache {
    pub fn new(max_per_recipient: usize, max_total_messages: usize, retention_ms: u64) -> Self {
        Self {
            per_recipient: HashMap::new(),
            total: 0,
            max_per_recipient,
            max_total_messages,
            retention_ms,
        }
    }

    /// Cache `payload` for `recipient_id`, generating a message-id if none is
    /// supplied. Validates before mutating anything.
    pub fn cache_for_offline_peer(
        &mut self,
        recipient_id: &str,
        payload: Vec<u8>,
        message_id: Option<[u8; 16]>,
        now_ms: u64,
    ) -> Result<[u8; 16], StoreForwardError> {
        if recipient_id.is_empty() {
            return Err(StoreForwardError::InvalidRecipient);
        }
        if payload.is_empty() {
            return Err(StoreForwardError::InvalidPayload);
        }

        let message_id = message_id.unwrap_or_else(|| {
            let uuid = uuid::Uuid::new_v4();
            *uuid.as_bytes()
        });

        let entry = CacheEntry {
            recipient_id: recipient_id.to_string(),
            message_id,
            payload,
            created_at: now_ms,
            expires_at: now_ms + self.retention_ms,
        };

        let queue = self.per_recipient.entry(recipient_id.to_string()).or_default();
        queue.push_back(entry);
        self.total += 1;

        if queue.len() > self.max_per_recipient {
            queue.pop_front();
            self.total -= 1;
        }
        self.evict_globally_if_over_capacity();

        Ok(message_id)
    }

    fn evict_globally_if_over_capacity(&mut self) {
        while self.total > self.max_total_messages {
            let oldest_recipient = self
                .per_recipient
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .min_by_key(|(_, q)| q.front().map(|e| e.created_at).unwrap_or(u64::MAX))
                .map(|(id, _)| id.clone());

            match oldest_recipient {
                Some(recipient_id) => {
                    if let Some(queue) = self.per_recipient.get_mut(&recipient_id) {
                        queue.pop_front();
                        self.total -= 1;
                    }
                }
                None => break,
            }
        }
    }

    pub fn len_for(&self, recipient_id: &str) -> usize {
        self.per_recipient.get(recipient_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.total
    }

    /// Drain `recipient_id`'s queue through `send_fn`. Successful sends are
    /// removed; failures are retained for retry and counted.
    pub fn deliver_cached_messages<F>(&mut self, recipient_id: &str, mut send_fn: F) -> usize
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let Some(queue) = self.per_recipient.get_mut(recipient_id) else {
            return 0;
        };

        let mut failures = 0;
        let mut retained = VecDeque::new();
        while let Some(entry) = queue.pop_front() {
            if send_fn(&entry) {
                self.total -= 1;
            } else {
                failures += 1;
                retained.push_back(entry);
            }
        }
        *queue = retained;
        failures
    }

    pub fn purge_expired(&mut self, now_ms: u64) {
        for queue in self.per_recipient.values_mut() {
            let before = queue.len();
            queue.retain(|entry| entry.expires_at > now_ms);
            self.total -= before - queue.len();
        }
    }
}
