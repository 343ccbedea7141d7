//! Bounded in-process DEK cache
//!
//! Plaintext DEKs are cached per tenant with a TTL; eviction zeroizes the
//! key bytes and the next use re-unwraps through the KMS. The cache is per
//! process; concurrent processes unwrap independently.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

struct CachedDek {
    key: Arc<Zeroizing<Vec<u8>>>,
    inserted_at: Instant,
}

pub struct DekCache {
    entries: DashMap<String, CachedDek>,
    ttl: Duration,
    capacity: usize,
}

impl DekCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Fetch a live entry, dropping it if the TTL has lapsed.
    pub fn get(&self, tenant_id: &str) -> Option<Arc<Zeroizing<Vec<u8>>>> {
        let expired = match self.entries.get(tenant_id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(Arc::clone(&entry.key));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(tenant_id);
        }
        None
    }

    pub fn insert(&self, tenant_id: &str, key: Zeroizing<Vec<u8>>) -> Arc<Zeroizing<Vec<u8>>> {
        self.sweep();
        let key = Arc::new(key);
        self.entries.insert(
            tenant_id.to_string(),
            CachedDek {
                key: Arc::clone(&key),
                inserted_at: Instant::now(),
            },
        );
        key
    }

    /// Drop a tenant's entry, e.g. after a mode transition or rotation.
    pub fn invalidate(&self, tenant_id: &str) {
        self.entries.remove(tenant_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries, then oldest-first down to capacity.
    fn sweep(&self) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![byte; 32])
    }

    #[test]
    fn hit_within_ttl() {
        let cache = DekCache::new(Duration::from_secs(60), 8);
        cache.insert("t1", key(1));
        assert!(cache.get("t1").is_some());
        assert!(cache.get("t2").is_none());
    }

    #[test]
    fn expired_entries_miss_and_are_dropped() {
        let cache = DekCache::new(Duration::from_millis(0), 8);
        cache.insert("t1", key(1));
        assert!(cache.get("t1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = DekCache::new(Duration::from_secs(60), 2);
        cache.insert("t1", key(1));
        cache.insert("t2", key(2));
        cache.insert("t3", key(3));
        assert!(cache.len() <= 2);
        assert!(cache.get("t3").is_some());
    }

    #[test]
    fn invalidate_forces_a_miss() {
        let cache = DekCache::new(Duration::from_secs(60), 8);
        cache.insert("t1", key(1));
        cache.invalidate("t1");
        assert!(cache.get("t1").is_none());
    }
}
