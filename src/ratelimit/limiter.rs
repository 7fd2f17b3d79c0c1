//! Core admission engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::bucket::{admit, BucketKey, Verdict};
use super::clock::{Clock, SystemClock};
use super::rules::RateLimitRule;
use super::store::{BucketStore, InMemoryBucketStore};

/// The admission engine: refills and debits buckets held in a [`BucketStore`].
///
/// Refill is computed lazily on each check; there is no background timer.
/// This struct is thread-safe and meant to be shared behind an `Arc`.
pub struct RateLimiter<S = InMemoryBucketStore> {
    /// Bucket state, keyed by scope and client
    store: S,
    /// Time source for `check`
    clock: Arc<dyn Clock>,
}

impl RateLimiter<InMemoryBucketStore> {
    /// Create a rate limiter with an in-memory store and the system clock.
    pub fn new() -> Self {
        Self::with_store(InMemoryBucketStore::new(), Arc::new(SystemClock))
    }

    /// Create a rate limiter with an in-memory store and the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(InMemoryBucketStore::new(), clock)
    }
}

impl Default for RateLimiter<InMemoryBucketStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BucketStore> RateLimiter<S> {
    /// Create a rate limiter over an explicit store and clock.
    pub fn with_store(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check `rule` for `key` at the current time.
    ///
    /// The clock is read inside the key's critical section, so checks on one
    /// key are evaluated in timestamp order.
    pub fn check(&self, key: &BucketKey, rule: &RateLimitRule) -> Verdict {
        self.evaluate(key, rule, || self.clock.now())
    }

    /// Check `rule` for `key` as of `now`.
    pub fn check_at(&self, key: &BucketKey, rule: &RateLimitRule, now: DateTime<Utc>) -> Verdict {
        self.evaluate(key, rule, || now)
    }

    fn evaluate<F>(&self, key: &BucketKey, rule: &RateLimitRule, now: F) -> Verdict
    where
        F: FnOnce() -> DateTime<Utc>,
    {
        trace!(key = %key, limit = rule.limit(), "Checking rate limit");

        let verdict = self.store.update(key, |bucket| {
            if bucket.is_none() {
                debug!(
                    key = %key,
                    limit = rule.limit(),
                    window_seconds = rule.window_seconds(),
                    "Creating new token bucket"
                );
            }
            admit(bucket, rule, now())
        });

        if !verdict.allowed {
            debug!(
                key = %key,
                reset_at = %verdict.reset_at,
                "Rate limit exceeded"
            );
        }

        verdict
    }

    /// The current time according to this limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Evict buckets idle for at least `idle_windows` of their window.
    pub fn sweep(&self, idle_windows: u32) -> usize {
        self.store.sweep(self.clock.now(), idle_windows)
    }

    /// Number of tracked buckets.
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Remaining whole tokens for a key as last stored, without refilling.
    ///
    /// Returns `None` if no bucket exists for the key.
    pub fn stored_tokens(&self, key: &BucketKey) -> Option<u32> {
        self.store.get(key).map(|state| state.tokens.floor() as u32)
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
