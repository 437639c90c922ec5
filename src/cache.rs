//! Time-bounded in-memory cache
//!
//! Every cache in the process carries a TTL; nothing is cached
//! indefinitely. Expired entries are dropped lazily on read and swept
//! periodically by a background task.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// A TTL cache over cloneable values
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Get a fresh value, dropping it if expired
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (stored_at, value) = entry.value();
                if stored_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    /// Remove one entry, e.g. after a write to the backing collection
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all expired entries
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        before - self.entries.len()
    }
}

/// Spawn a periodic sweep task for a cache
pub fn spawn_sweep_task<K, V>(cache: Arc<TtlCache<K, V>>, interval: Duration)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!("Cache sweep dropped {} expired entries", purged);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_within_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_expired_entry_dropped() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::ZERO);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.invalidate(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_purge_expired() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::ZERO);
        cache.insert(1, 1);
        cache.insert(2, 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }
}
