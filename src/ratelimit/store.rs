//! Bucket storage.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::bucket::{BucketKey, BucketState};

/// Storage for bucket state.
///
/// Implementations own all bucket state. [`BucketStore::update`] must run its
/// closure as a critical section for the key: concurrent updates of the same key
/// observe each other's writes, while updates of unrelated keys need not wait.
pub trait BucketStore: Send + Sync {
    /// Read the bucket for `key` (if any), hand it to `f`, and store what `f` returns.
    fn update<R, F>(&self, key: &BucketKey, f: F) -> R
    where
        F: FnOnce(Option<BucketState>) -> (BucketState, R);

    /// Current state of a bucket, without modifying it.
    fn get(&self, key: &BucketKey) -> Option<BucketState>;

    /// Remove buckets idle for at least `idle_windows` of their window.
    ///
    /// Returns the number of buckets removed.
    fn sweep(&self, now: DateTime<Utc>, idle_windows: u32) -> usize;

    /// Number of tracked buckets.
    fn len(&self) -> usize;

    /// Whether no buckets are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every bucket.
    fn clear(&self);
}

/// In-process store backed by a sharded concurrent map.
///
/// An update holds the write lock of the key's shard for the duration of the
/// closure; keys that hash to other shards are never blocked.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<BucketKey, BucketState>,
}

impl InMemoryBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for InMemoryBucketStore {
    fn update<R, F>(&self, key: &BucketKey, f: F) -> R
    where
        F: FnOnce(Option<BucketState>) -> (BucketState, R),
    {
        match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let (state, result) = f(Some(*entry.get()));
                entry.insert(state);
                result
            }
            Entry::Vacant(entry) => {
                let (state, result) = f(None);
                entry.insert(state);
                result
            }
        }
    }

    fn get(&self, key: &BucketKey) -> Option<BucketState> {
        self.buckets.get(key).map(|state| *state)
    }

    fn sweep(&self, now: DateTime<Utc>, idle_windows: u32) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, state| {
            let idle = state.is_idle(now, idle_windows);
            if idle {
                removed += 1;
            }
            !idle
        });
        removed
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn clear(&self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::RateLimitRule;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn touch(store: &InMemoryBucketStore, key: &BucketKey, at: DateTime<Utc>) {
        let rule = RateLimitRule::new(10, 60.0).unwrap();
        store.update(key, |existing| {
            let mut state = existing.unwrap_or_else(|| BucketState::full(&rule, at));
            state.last_seen = at;
            (state, ())
        });
    }

    #[test]
    fn test_update_inserts_then_modifies() {
        let store = InMemoryBucketStore::new();
        let key = BucketKey::new("test", "client");
        let rule = RateLimitRule::new(3, 60.0).unwrap();

        let seen_before = store.update(&key, |existing| {
            (BucketState::full(&rule, t0()), existing.is_some())
        });
        assert!(!seen_before);

        let tokens = store.update(&key, |existing| {
            let mut state = existing.unwrap();
            state.tokens -= 1.0;
            (state, state.tokens)
        });
        assert_eq!(tokens, 2.0);
        assert_eq!(store.get(&key).map(|s| s.tokens), Some(2.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_idle_buckets() {
        let store = InMemoryBucketStore::new();
        let stale = BucketKey::new("test", "stale");
        let fresh = BucketKey::new("test", "fresh");

        touch(&store, &stale, t0());
        touch(&store, &fresh, t0() + Duration::seconds(100));

        let removed = store.sweep(t0() + Duration::seconds(120), 2);

        assert_eq!(removed, 1);
        assert!(store.get(&stale).is_none());
        assert!(store.get(&fresh).is_some());
    }

    #[test]
    fn test_clear() {
        let store = InMemoryBucketStore::new();
        touch(&store, &BucketKey::new("test", "a"), t0());
        touch(&store, &BucketKey::new("test", "b"), t0());
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }
}
