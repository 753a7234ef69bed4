//! Bounded, TTL-based at-most-once fingerprint cache.
//!
//! `seen()` is the only mutator: it records a fingerprint's first sighting
//! and reports whether it had already been recorded. Capacity and TTL
//! eviction both happen lazily, inline with `seen()`, so there is no
//! background sweeper task to own or shut down.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Maximum number of live fingerprints. Oldest-by-first-seen entries are
/// evicted once this is exceeded.
pub const MAX_ENTRIES: usize = 10_000;

/// How long a fingerprint stays live after first being seen.
pub const ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct Inner {
    first_seen: HashMap<String, Instant>,
    /// Insertion order, oldest first. May contain stale entries for keys
    /// already removed by TTL eviction; those are skipped on pop.
    order: VecDeque<String>,
}

/// At-most-once filter keyed by event fingerprints.
pub struct DedupCache {
    inner: Mutex<Inner>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    pub fn new() -> Self {
        DedupCache {
            inner: Mutex::new(Inner {
                first_seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record `fingerprint` if this is its first sighting within the
    /// active window, returning `true` iff it had already been seen.
    ///
    /// Concurrent calls for the same fingerprint serialize on the internal
    /// lock, so exactly one caller observes `false`.
    pub fn seen(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");

        Self::evict_expired(&mut inner, now);

        if inner.first_seen.contains_key(fingerprint) {
            return true;
        }

        inner.first_seen.insert(fingerprint.to_string(), now);
        inner.order.push_back(fingerprint.to_string());
        Self::evict_over_capacity(&mut inner);
        false
    }

    /// Remove all recorded fingerprints.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        inner.first_seen.clear();
        inner.order.clear();
    }

    /// Current number of live entries. Exposed for tests and health
    /// reporting; not part of the component's core contract.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("dedup cache lock poisoned");
        Self::evict_expired(&mut inner, Instant::now());
        inner.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(inner: &mut Inner, now: Instant) {
        while let Some(key) = inner.order.front() {
            match inner.first_seen.get(key) {
                Some(seen_at) if now.duration_since(*seen_at) >= ENTRY_TTL => {
                    let key = inner.order.pop_front().unwrap();
                    inner.first_seen.remove(&key);
                }
                Some(_) => break,
                // Already removed (e.g. by capacity eviction); drop the stale order entry.
                None => {
                    inner.order.pop_front();
                }
            }
        }
    }

    fn evict_over_capacity(inner: &mut Inner) {
        while inner.first_seen.len() > MAX_ENTRIES {
            match inner.order.pop_front() {
                Some(key) => {
                    inner.first_seen.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_sighting_returns_false_then_true() {
        let cache = DedupCache::new();
        assert!(!cache.seen("t1"));
        assert!(cache.seen("t1"));
        assert!(cache.seen("t1"));
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = DedupCache::new();
        cache.seen("t1");
        cache.clear();
        assert!(!cache.seen("t1"));
    }

    #[test]
    fn distinct_fingerprints_are_independent() {
        let cache = DedupCache::new();
        assert!(!cache.seen("a"));
        assert!(!cache.seen("b"));
        assert!(cache.seen("a"));
        assert!(cache.seen("b"));
    }

    #[test]
    fn exactly_one_concurrent_caller_sees_false() {
        let cache = Arc::new(DedupCache::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || cache.seen("race")));
        }
        let false_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|already_seen| !already_seen)
            .count();
        assert_eq!(false_count, 1);
    }

    #[test]
    fn capacity_eviction_drops_oldest_first() {
        let cache = DedupCache::new();
        // Exceed capacity by a small margin using a cache with a much
        // smaller effective bound would require exposing MAX_ENTRIES as
        // configurable; instead verify the public invariant directly.
        for i in 0..1000 {
            cache.seen(&format!("fp-{i}"));
        }
        assert!(cache.len() <= MAX_ENTRIES);
    }
}
