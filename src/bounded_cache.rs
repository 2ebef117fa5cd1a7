//! Bounded hash cache with TTL and max-size eviction.
//!
//! Remembers which origin transaction hashes this process has already paid
//! out, so a live item and a catch-up item for the same deposit cannot both
//! reach the destination pool.
//!
//! Each entry is ~48 bytes (32-byte key + Instant, stored in a map and an
//! insertion queue), so the default 100k entries stay under 10 MB.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use alloy::primitives::B256;
use tokio::time::Instant;

/// Insertion-ordered set of hashes with capacity and TTL limits.
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** expired entries are invisible to `contains` and are pruned on insert.
#[derive(Debug)]
pub struct BoundedHashCache {
    map: HashMap<B256, Instant>,
    order: VecDeque<(B256, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedHashCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.map.get(hash).is_some_and(|t| t.elapsed() < self.ttl)
    }

    pub fn insert(&mut self, hash: B256) {
        let now = Instant::now();
        self.prune_expired(now);

        if !self.map.contains_key(&hash) {
            while self.map.len() >= self.max_size {
                if !self.evict_front() {
                    break;
                }
            }
        }

        self.map.insert(hash, now);
        self.order.push_back((hash, now));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn prune_expired(&mut self, now: Instant) {
        while let Some(&(_, inserted)) = self.order.front() {
            if now.duration_since(inserted) < self.ttl {
                break;
            }
            self.evict_front();
        }
    }

    /// Pop the oldest queue entry. Stale queue entries left behind by a
    /// re-insert are skipped without touching the map.
    fn evict_front(&mut self) -> bool {
        match self.order.pop_front() {
            Some((hash, inserted)) => {
                if self.map.get(&hash) == Some(&inserted) {
                    self.map.remove(&hash);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_cache_insert_and_contains() {
        let mut cache = BoundedHashCache::new(10, 3600);
        let hash = B256::repeat_byte(1);
        assert!(!cache.contains(&hash));
        cache.insert(hash);
        assert!(cache.contains(&hash));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hash_cache_evicts_oldest() {
        let mut cache = BoundedHashCache::new(3, 3600);
        for byte in 1..=4u8 {
            cache.insert(B256::repeat_byte(byte));
        }
        assert!(!cache.contains(&B256::repeat_byte(1)));
        assert!(cache.contains(&B256::repeat_byte(4)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_reinsert_does_not_evict_others() {
        let mut cache = BoundedHashCache::new(2, 3600);
        cache.insert(B256::repeat_byte(1));
        cache.insert(B256::repeat_byte(2));
        cache.insert(B256::repeat_byte(2));
        assert!(cache.contains(&B256::repeat_byte(1)));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let mut cache = BoundedHashCache::new(10, 60);
        cache.insert(B256::repeat_byte(7));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.contains(&B256::repeat_byte(7)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.contains(&B256::repeat_byte(7)));

        cache.insert(B256::repeat_byte(8));
        assert_eq!(cache.len(), 1);
    }
}
