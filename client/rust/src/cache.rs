//! Query cache (C9): an LRU of recent `can()`/`findAllObjectsWhereSubjectCan()`
//! results with TTL expiry and prefix-based invalidation on mutation.
//!
//! Per SPEC_FULL.md §4.9 (resolving the Open Question in spec §9),
//! invalidation is prefix-matched by subject and then by object rather than
//! a global clear, so a mutation on `u:alice` doesn't evict cached answers
//! for unrelated subjects.

use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::wire::{EdgeType, NodeId};

/// Key for a cached `can(subject, object, capability)` answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject_id: NodeId,
    pub object_id: NodeId,
    pub capability: Option<String>,
}

impl CacheKey {
    pub fn new(subject_id: impl Into<NodeId>, object_id: impl Into<NodeId>, capability: Option<EdgeType>) -> Self {
        Self {
            subject_id: subject_id.into(),
            object_id: object_id.into(),
            capability,
        }
    }
}

struct Entry {
    value: bool,
    inserted_at: Instant,
}

/// TTL-bounded LRU cache of permission check results.
pub struct QueryCache {
    inner: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Look up a cached answer, returning `None` on miss or expiry.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            inner.pop(key);
            return None;
        }
        Some(entry.value)
    }

    pub fn put(&self, key: CacheKey, value: bool) {
        self.inner.lock().unwrap().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Evict every cached entry touching `node_id`, as either subject or
    /// object, following a mutation involving that node.
    pub fn invalidate_node(&self, node_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<CacheKey> = inner
            .iter()
            .filter(|(k, _)| k.subject_id == node_id || k.object_id == node_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_miss_after_invalidate() {
        let cache = QueryCache::new(16, Duration::from_secs(60));
        let key = CacheKey::new("u:alice", "r:doc1", Some("read".into()));
        cache.put(key.clone(), true);
        assert_eq!(cache.get(&key), Some(true));
        cache.invalidate_node("u:alice");
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn invalidate_by_object_leaves_unrelated_subject_alone() {
        let cache = QueryCache::new(16, Duration::from_secs(60));
        let alice = CacheKey::new("u:alice", "r:doc1", None);
        let bob = CacheKey::new("u:bob", "r:doc2", None);
        cache.put(alice.clone(), true);
        cache.put(bob.clone(), false);
        cache.invalidate_node("r:doc1");
        assert_eq!(cache.get(&alice), None);
        assert_eq!(cache.get(&bob), Some(false));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = QueryCache::new(16, Duration::from_millis(1));
        let key = CacheKey::new("u:alice", "r:doc1", None);
        cache.put(key.clone(), true);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn eviction_at_capacity_follows_lru_order() {
        let cache = QueryCache::new(1, Duration::from_secs(60));
        let a = CacheKey::new("u:a", "r:1", None);
        let b = CacheKey::new("u:b", "r:1", None);
        cache.put(a.clone(), true);
        cache.put(b.clone(), true);
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), Some(true));
    }
}
