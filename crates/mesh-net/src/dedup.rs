//! Deduplication: a Bloom filter backed by an exact-match LRU, with
//! two-generation grace-period rotation on the Bloom filter.
//!
//! `is_duplicate` is true iff the id is in the LRU, the current Bloom, or the
//! old Bloom during its grace window. `mark_seen` inserts into both the LRU
//! and the current Bloom. When the current filter's fill ratio crosses the
//! reset threshold, a fresh filter is allocated, the LRU is replayed into it,
//! and the stale filter is retained as `old` until `grace_deadline`.

use bitvec::vec::BitVec;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

const FILL_RATIO_RESET_THRESHOLD: f64 = 0.75;

struct Bloom {
    bits: BitVec,
    hash_count: u32,
    set_count: usize,
}

impl Bloom {
    fn new(size: usize, hash_count: u32) -> Self {
        Self {
            bits: BitVec::repeat(false, size),
            hash_count,
            set_count: 0,
        }
    }

    fn indices(&self, id: &[u8; 16]) -> Vec<usize> {
        let h1 = mesh_core::primitives::crc32(id) as u64;
        let h2 = mesh_core::primitives::crc32(&id.iter().rev().copied().collect::<Vec<u8>>()) as u64;
        (0..self.hash_count)
            .map(|i| ((h1.wrapping_add(i as u64 * h2)) as usize) % self.bits.len())
            .collect()
    }

    fn insert(&mut self, id: &[u8; 16]) {
        for idx in self.indices(id) {
            if !self.bits[idx] {
                self.bits.set(idx, true);
            }
        }
        self.set_count += 1;
    }

    fn contains(&self, id: &[u8; 16]) -> bool {
        self.indices(id).into_iter().all(|idx| self.bits[idx])
    }

    fn fill_ratio(&self) -> f64 {
        self.bits.count_ones() as f64 / self.bits.len() as f64
    }
}

/// Running counters exposed for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupStats {
    pub checks: u64,
    pub bloom_positives: u64,
    pub cache_hits: u64,
    pub duplicates: u64,
    pub inserts: u64,
    pub resets: u64,
}

impl DedupStats {
    /// Estimated Bloom false-positive rate given the current fill ratio and
    /// hash count: `(fill_ratio)^hash_count`.
    pub fn estimated_false_positive_rate(&self, fill_ratio: f64, hash_count: u32) -> f64 {
        fill_ratio.powi(hash_count as i32)
    }
}

pub struct DedupState {
    current: Bloom,
    old: Option<Bloom>,
    grace_deadline: Option<u64>,
    grace_period_ms: u64,
    lru: LruCache<[u8; 16], ()>,
    bloom_size: usize,
    hash_count: u32,
    stats: DedupStats,
}

impl DedupState {
    pub fn new(bloom_size: usize, hash_count: u32, lru_capacity: usize, grace_period_ms: u64) -> Self {
        Self {
            current: Bloom::new(bloom_size, hash_count),
            old: None,
            grace_deadline: None,
            grace_period_ms,
            lru: LruCache::new(NonZeroUsize::new(lru_capacity.max(1)).unwrap()),
            bloom_size,
            hash_count,
            stats: DedupStats::default(),
        }
    }

    fn drop_old_if_expired(&mut self, now_ms: u64) {
        if let Some(deadline) = self.grace_deadline {
            if now_ms >= deadline {
                self.old = None;
                self.grace_deadline = None;
            }
        }
    }

    pub fn is_duplicate(&mut self, id: &[u8; 16], now_ms: u64) -> bool {
        self.drop_old_if_expired(now_ms);
        self.stats.checks += 1;

        if self.lru.contains(id) {
            self.stats.cache_hits += 1;
            self.stats.duplicates += 1;
            return true;
        }
        if self.current.contains(id) {
            self.stats.bloom_positives += 1;
            self.stats.duplicates += 1;
            return true;
        }
        if let Some(old) = &self.old {
            if old.contains(id) {
                self.stats.bloom_positives += 1;
                self.stats.duplicates += 1;
                return true;
            }
        }
        false
    }

    pub fn mark_seen(&mut self, id: [u8; 16], now_ms: u64) {
        self.lru.put(id, ());
        self.current.insert(&id);
        self.maybe_reset(now_ms);
    }

    /// `is_duplicate` followed by `mark_seen` if not a duplicate, as one call.
    pub fn check_and_mark(&mut self, id: [u8; 16], now_ms: u64) -> bool {
        if self.is_duplicate(&id, now_ms) {
            true
        } else {
            self.mark_seen(id, now_ms);
            false
        }
    }

    fn maybe_reset(&mut self, now_ms: u64) {
        if self.current.fill_ratio() < FILL_RATIO_RESET_THRESHOLD {
            return;
        }
        let mut fresh = Bloom::new(self.bloom_size, self.hash_count);
        for id in self.lru.iter().map(|(id, _)| *id) {
            fresh.insert(&id);
        }
        let stale = std::mem::replace(&mut self.current, fresh);
        self.old = Some(stale);
        self.grace_deadline = Some(now_ms + self.grace_period_ms);
        self.stats.resets += 1;
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    pub fn current_fill_ratio(&self) -> f64 {
        self.current.fill_ratio()
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0] = byte;
        buf
    }

    #[test]
    fn mark_seen_then_is_duplicate() {
        let mut dedup = DedupState::new(4096, 4, 128, 60_000);
        assert!(!dedup.is_duplicate(&id(1), 0));
        dedup.mark_seen(id(1), 0);
        assert!(dedup.is_duplicate(&id(1), 0));
    }

    #[test]
    fn check_and_mark_is_idempotent_against_second_call() {
        let mut dedup = DedupState::new(4096, 4, 128, 60_000);
        assert!(!dedup.check_and_mark(id(2), 0));
        assert!(dedup.check_and_mark(id(2), 0));
    }

    #[test]
    fn bloom_reset_retains_lru_membership() {
        // Small bloom filter forces a reset quickly; all 20 ids inserted
        // stay in the LRU (capacity 20) and must still read as duplicates.
        let mut dedup = DedupState::new(64, 4, 20, 60_000);
        let ids: Vec<[u8; 16]> = (0..20).map(id).collect();
        for &i in &ids {
            dedup.mark_seen(i, 0);
        }
        assert!(dedup.stats().resets > 0 || dedup.current_fill_ratio() >= 0.75);
        for &i in &ids {
            assert!(dedup.is_duplicate(&i, 1_000));
        }
    }

    #[test]
    fn old_bloom_dropped_after_grace_deadline() {
        let mut dedup = DedupState::new(64, 4, 4, 1_000);
        for i in 0..4u8 {
            dedup.mark_seen(id(i), 0);
        }
        // Force a reset by inserting past the LRU capacity and fill ratio.
        for i in 4..40u8 {
            dedup.mark_seen(id(i), 0);
        }
        assert!(dedup.stats().resets > 0);
        // After the grace deadline passes, the old generation is dropped —
        // membership only survives if it's still in the LRU.
        let still_known = dedup.is_duplicate(&id(0), 50_000);
        assert!(!still_known || dedup.lru.contains(&id(0)));
    }

    #[test]
    fn distinct_ids_are_not_duplicates() {
        let mut dedup = DedupState::new(4096, 4, 128, 0);
        dedup.mark_seen(id(1), 0);
        assert!(!dedup.is_duplicate(&id(2), 0));
    }
}
