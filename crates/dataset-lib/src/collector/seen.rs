//! Time-bounded deduplication of watch events
//!
//! Watch streams redeliver objects after reconnects. The cache remembers
//! `(namespace, kind, name, resourceVersion)` keys for a short TTL so the
//! same revision is emitted once, while a new resourceVersion of the same
//! object always passes through.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default time-to-live for cache entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Default bound on the number of remembered keys
pub const DEFAULT_MAX_ENTRIES: usize = 5000;

/// Identity of one revision of one observed object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeenKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub resource_version: String,
}

impl SeenKey {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        resource_version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
            resource_version: resource_version.into(),
        }
    }
}

/// Deduplication set with per-entry expiry
///
/// Owned by a single watcher; no internal synchronization.
#[derive(Debug)]
pub struct SeenCache {
    ttl: Duration,
    max_entries: usize,
    expiries: HashMap<SeenKey, Instant>,
    /// Insertion order; with a constant TTL this is also expiry order
    order: VecDeque<SeenKey>,
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            expiries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns true when `key` was already seen and is unexpired (suppress).
    /// Otherwise records it with a fresh expiry and returns false (emit).
    pub fn seen(&mut self, key: &SeenKey) -> bool {
        self.seen_at(key, Instant::now())
    }

    /// Same as [`SeenCache::seen`] with an explicit clock
    pub fn seen_at(&mut self, key: &SeenKey, now: Instant) -> bool {
        self.purge_expired(now);

        if self.expiries.contains_key(key) {
            return true;
        }

        while self.order.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.expiries.remove(&oldest);
            }
        }

        self.expiries.insert(key.clone(), now + self.ttl);
        self.order.push_back(key.clone());
        false
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }

    /// Forget everything (used when a watcher is torn down)
    pub fn clear(&mut self) {
        self.expiries.clear();
        self.order.clear();
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            match self.expiries.get(front) {
                Some(expiry) if *expiry > now => break,
                _ => {
                    if let Some(expired) = self.order.pop_front() {
                        self.expiries.remove(&expired);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(rv: &str) -> SeenKey {
        SeenKey::new("default", "Deployment", "nginx", rv)
    }

    #[test]
    fn test_second_call_within_ttl_suppresses() {
        let mut cache = SeenCache::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(!cache.seen_at(&key("1"), t0));
        assert!(cache.seen_at(&key("1"), t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_emits_again_after_ttl() {
        let mut cache = SeenCache::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(!cache.seen_at(&key("1"), t0));
        assert!(!cache.seen_at(&key("1"), t0 + Duration::from_secs(11)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_suppression_does_not_extend_expiry() {
        let mut cache = SeenCache::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(!cache.seen_at(&key("1"), t0));
        assert!(cache.seen_at(&key("1"), t0 + Duration::from_secs(9)));
        assert!(!cache.seen_at(&key("1"), t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_distinct_resource_versions_pass_through() {
        let mut cache = SeenCache::default();
        let t0 = Instant::now();

        assert!(!cache.seen_at(&key("1"), t0));
        assert!(!cache.seen_at(&key("2"), t0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = SeenCache::with_capacity(Duration::from_secs(60), 2);
        let t0 = Instant::now();

        cache.seen_at(&key("1"), t0);
        cache.seen_at(&key("2"), t0);
        cache.seen_at(&key("3"), t0);

        assert_eq!(cache.len(), 2);
        assert!(!cache.seen_at(&key("1"), t0));
    }
}
