//! TTL caches shared across the gateway: tool lists per tenant, health
//! status per tool, enhanced schemas per tool. Stale entries count as
//! misses; snapshots are cloned out so callers never hold cache guards.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use meshgate_types::McpToolView;
use uuid::Uuid;

pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns `(value, hit)`; expired entries are removed and miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, inserted) = entry.value();
                if inserted.elapsed() < self.ttl {
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
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `tools/list` results keyed by tenant.
pub type ToolListCache = TtlCache<String, Vec<McpToolView>>;

/// AI-enhanced tool views keyed by tool id; invalidated on tool update or
/// credential rotation. Health observations live in the health manager,
/// whose TTL is per-tool.
pub type SchemaCache = TtlCache<Uuid, McpToolView>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_hit() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".into()), Some(1));
    }

    #[test]
    fn stale_entries_miss_and_evict() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(0));
        cache.insert("a".into(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".into()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.invalidate(&"a".into());
        assert_eq!(cache.get(&"a".into()), None);
    }
}
