//! Token bucket state and the admission step that evolves it.

use chrono::{DateTime, Duration, Utc};

use super::rules::RateLimitRule;

/// A key that uniquely identifies a bucket.
///
/// The scope names the call site's rule (e.g. `api.standard`) so one client
/// gets an independent bucket per rule it is subject to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Rule scope this bucket is provisioned under
    pub scope: String,
    /// Resolved client identifier
    pub client: String,
}

impl BucketKey {
    /// Create a key for `client` under `scope`.
    pub fn new(scope: &str, client: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            client: client.into(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope, self.client)
    }
}

/// Stored state of one bucket.
///
/// `tokens` stays within `0..=limit` of the rule the bucket was checked with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Currently available tokens
    pub tokens: f64,
    /// Last instant at which whole tokens were added
    pub last_refill: DateTime<Utc>,
    /// Last instant the bucket was checked
    pub last_seen: DateTime<Utc>,
    /// Window of the rule that last touched the bucket, used for eviction
    pub window_seconds: f64,
}

impl BucketState {
    /// A fully provisioned bucket for `rule`.
    pub fn full(rule: &RateLimitRule, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(rule.limit()),
            last_refill: now,
            last_seen: now,
            window_seconds: rule.window_seconds(),
        }
    }

    /// Whether the bucket has been idle for at least `idle_windows` of its window.
    pub fn is_idle(&self, now: DateTime<Utc>, idle_windows: u32) -> bool {
        let idle_for = elapsed_micros(self.last_seen, now) as f64 / 1_000_000.0;
        idle_for >= self.window_seconds * f64::from(idle_windows)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured bucket size
    pub limit: u32,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// When at least one token will next be available
    pub reset_at: DateTime<Utc>,
}

impl Verdict {
    /// Reset instant in milliseconds since the Unix epoch.
    pub fn reset_millis(&self) -> i64 {
        self.reset_at.timestamp_millis()
    }

    /// Whole seconds until `reset_at`, rounded up and never negative.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let micros = elapsed_micros(now, self.reset_at);
        (micros as u64).div_ceil(1_000_000)
    }
}

/// Refill `bucket` lazily, debit one token if possible, and report the verdict.
///
/// A missing bucket starts full. Refill runs on whole microseconds and only
/// whole tokens are added; when none are, `last_refill` stays put so partial
/// progress toward the next token is kept. A rejected check debits nothing.
pub fn admit(
    bucket: Option<BucketState>,
    rule: &RateLimitRule,
    now: DateTime<Utc>,
) -> (BucketState, Verdict) {
    let limit = rule.limit();
    let window_us = i128::from(rule.window_micros());
    let state = bucket.unwrap_or_else(|| BucketState::full(rule, now));

    let elapsed_us = i128::from(elapsed_micros(state.last_refill, now));
    let tokens_to_add = elapsed_us * i128::from(limit) / window_us;
    let added = tokens_to_add.min(i128::from(limit)) as f64;
    let refilled = (state.tokens + added).min(f64::from(limit));
    let last_refill = if tokens_to_add > 0 {
        now
    } else {
        state.last_refill
    };

    let allowed = refilled >= 1.0;
    let remaining = if allowed { refilled - 1.0 } else { refilled };

    let reset_at = if allowed {
        now + micros_for_tokens(1, limit, window_us)
    } else {
        // Nothing was added, so the missing tokens accrue from `last_refill`.
        let missing = (1.0 - remaining).ceil().max(1.0) as i128;
        last_refill + micros_for_tokens(missing, limit, window_us)
    };
    debug_assert!(reset_at > now);

    let next = BucketState {
        tokens: remaining,
        last_refill,
        last_seen: state.last_seen.max(now),
        window_seconds: rule.window_seconds(),
    };

    let verdict = Verdict {
        allowed,
        limit,
        remaining: remaining.floor() as u32,
        reset_at,
    };

    (next, verdict)
}

/// Shortest span after which `tokens` whole tokens have been refilled.
///
/// Rounds up, so the refill step run at the returned instant adds at least `tokens`.
fn micros_for_tokens(tokens: i128, limit: u32, window_us: i128) -> Duration {
    let limit = i128::from(limit);
    let micros = (tokens * window_us + limit - 1) / limit;
    Duration::microseconds(micros.min(i128::from(i64::MAX)) as i64)
}

/// Microseconds from `since` to `now`; zero if the clock stepped backwards.
fn elapsed_micros(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    match (now - since).num_microseconds() {
        Some(micros) => micros.max(0),
        None if now > since => i64::MAX,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn rule(limit: u32, window_seconds: f64) -> RateLimitRule {
        RateLimitRule::new(limit, window_seconds).unwrap()
    }

    #[test]
    fn test_bucket_key_display() {
        let key = BucketKey::new("api.standard", "203.0.113.7");
        assert_eq!(key.to_string(), "api.standard:203.0.113.7");
    }

    #[test]
    fn test_new_bucket_starts_full() {
        let (state, verdict) = admit(None, &rule(10, 60.0), t0());

        assert!(verdict.allowed);
        assert_eq!(verdict.remaining, 9);
        assert_eq!(state.tokens, 9.0);
        assert_eq!(state.last_refill, t0());
        assert_eq!(verdict.reset_at, t0() + Duration::seconds(6));
    }

    #[test]
    fn test_rejection_debits_nothing() {
        let rule = rule(1, 60.0);
        let (state, _) = admit(None, &rule, t0());
        let (after, verdict) = admit(Some(state), &rule, t0() + Duration::seconds(10));

        assert!(!verdict.allowed);
        assert_eq!(after.tokens, 0.0);
        assert_eq!(after.last_refill, t0());
    }

    #[test]
    fn test_partial_progress_is_kept() {
        let rule = rule(10, 60.0);
        let mut state = None;
        for _ in 0..10 {
            state = Some(admit(state, &rule, t0()).0);
        }

        // 4s is less than one token's worth; the clock must not move.
        let (state, verdict) = admit(state, &rule, t0() + Duration::seconds(4));
        assert!(!verdict.allowed);
        assert_eq!(state.last_refill, t0());

        // 2s later the accrued 6s completes a token.
        let (_, verdict) = admit(Some(state), &rule, t0() + Duration::seconds(6));
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining, 0);
    }

    #[test]
    fn test_retry_at_reset_is_admitted() {
        for (limit, window_seconds) in [(3, 1.0), (7, 10.0), (3, 0.9), (60, 7.0)] {
            let rule = rule(limit, window_seconds);
            let mut state = None;
            for _ in 0..limit {
                state = Some(admit(state, &rule, t0()).0);
            }

            let (state, rejected) = admit(state, &rule, t0());
            assert!(!rejected.allowed);
            assert!(rejected.reset_at > t0());
            assert!(rejected.retry_after_secs(t0()) > 0);

            let (_, retry) = admit(Some(state), &rule, rejected.reset_at);
            assert!(
                retry.allowed,
                "limit={} window={} not admitted at reset",
                limit, window_seconds
            );
            assert!(retry.reset_at > rejected.reset_at);
        }
    }

    #[test]
    fn test_uneven_step_rounds_reset_up() {
        // 10s / 7 tokens is 1428571.43us; the reset lands on the next whole microsecond.
        let rule = rule(7, 10.0);
        let mut state = None;
        for _ in 0..7 {
            state = Some(admit(state, &rule, t0()).0);
        }

        let (state, rejected) = admit(state, &rule, t0());
        assert_eq!(rejected.reset_at, t0() + Duration::microseconds(1_428_572));

        let just_before = rejected.reset_at - Duration::microseconds(1);
        let (_, early) = admit(Some(state), &rule, just_before);
        assert!(!early.allowed);
        assert_eq!(early.reset_at, rejected.reset_at);
    }

    #[test]
    fn test_clock_step_backwards_adds_nothing() {
        let rule = rule(2, 60.0);
        let (state, _) = admit(None, &rule, t0());
        let (state, _) = admit(Some(state), &rule, t0());

        let (state, verdict) = admit(Some(state), &rule, t0() - Duration::seconds(120));
        assert!(!verdict.allowed);
        assert_eq!(state.tokens, 0.0);
        assert!(verdict.reset_at > t0() - Duration::seconds(120));
        assert_eq!(state.last_seen, t0());
    }

    #[test]
    fn test_tokens_never_exceed_limit() {
        let rule = rule(5, 10.0);
        let (state, _) = admit(None, &rule, t0());
        let (state, verdict) = admit(Some(state), &rule, t0() + Duration::days(3));

        assert_eq!(verdict.remaining, 4);
        assert_eq!(state.tokens, 4.0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let verdict = Verdict {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: t0() + Duration::milliseconds(5_200),
        };

        assert_eq!(verdict.retry_after_secs(t0()), 6);
        assert_eq!(verdict.retry_after_secs(t0() + Duration::milliseconds(5_200)), 0);
        assert_eq!(verdict.retry_after_secs(t0() + Duration::seconds(60)), 0);
        assert_eq!(verdict.retry_after_secs(verdict.reset_at - Duration::microseconds(1)), 1);
        assert_eq!(verdict.reset_millis(), t0().timestamp_millis() + 5_200);
    }

    #[test]
    fn test_idle_detection() {
        let rule = rule(10, 60.0);
        let (state, _) = admit(None, &rule, t0());

        assert!(!state.is_idle(t0() + Duration::seconds(119), 2));
        assert!(state.is_idle(t0() + Duration::seconds(120), 2));
    }
}
