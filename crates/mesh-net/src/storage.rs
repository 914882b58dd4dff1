//! The storage contract: consumed by the orchestrator to persist identity
//! material and session export blobs. An in-memory implementation is
//! provided for tests.

use dashmap::DashMap;
use std::sync::Arc;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, bytes: Vec<u8>);
    fn delete(&self, key: &str);
    fn clear(&self);
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, bytes: Vec<u8>) {
        self.entries.insert(key.to_string(), bytes);
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
