//! Eviction of idle buckets.
//!
//! A bucket idle for a whole window would have refilled to its limit, which is
//! exactly the state a newly created bucket starts in. Removing it after
//! `idle_windows >= 1` windows therefore never changes an admission decision.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;
use super::store::BucketStore;

/// Periodically sweeps idle buckets out of a limiter's store.
pub struct Reaper<S> {
    limiter: Arc<RateLimiter<S>>,
    interval: Duration,
    idle_windows: u32,
}

impl<S: BucketStore + 'static> Reaper<S> {
    /// Create a reaper. `idle_windows` is clamped to at least one window.
    pub fn new(limiter: Arc<RateLimiter<S>>, interval: Duration, idle_windows: u32) -> Self {
        Self {
            limiter,
            interval,
            idle_windows: idle_windows.max(1),
        }
    }

    /// Run one sweep now. Returns the number of evicted buckets.
    pub fn sweep_once(&self) -> usize {
        let removed = self.limiter.sweep(self.idle_windows);
        if removed > 0 {
            info!(
                removed,
                remaining = self.limiter.bucket_count(),
                "Evicted idle rate limit buckets"
            );
        } else {
            debug!("No idle rate limit buckets to evict");
        }
        removed
    }

    /// Sweep every `interval` on the tokio runtime until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }
}
