//! Rate limit rules and the route/operation tables that select them.
//!
//! A [`RateLimitRule`] is immutable once built and always valid: both the
//! constructor and deserialization reject a zero limit or a non-positive window,
//! so a bad rule fails at configuration time and never reaches the hot path.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SlotguardError};

/// Shortest accepted window: one microsecond, the refill resolution.
pub const MIN_WINDOW_SECONDS: f64 = 0.000_001;
/// Longest accepted window: one year.
pub const MAX_WINDOW_SECONDS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// A token-bucket rule: `limit` tokens, fully replenished every `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRule", into = "RawRule")]
pub struct RateLimitRule {
    limit: u32,
    window_seconds: f64,
}

/// Unvalidated wire form of a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawRule {
    limit: u32,
    window_seconds: f64,
}

impl TryFrom<RawRule> for RateLimitRule {
    type Error = SlotguardError;

    fn try_from(raw: RawRule) -> Result<Self> {
        RateLimitRule::new(raw.limit, raw.window_seconds)
    }
}

impl From<RateLimitRule> for RawRule {
    fn from(rule: RateLimitRule) -> Self {
        RawRule {
            limit: rule.limit,
            window_seconds: rule.window_seconds,
        }
    }
}

impl RateLimitRule {
    /// Build a rule, rejecting a zero limit or a window that is not a positive finite number.
    pub fn new(limit: u32, window_seconds: f64) -> Result<Self> {
        if limit == 0 {
            return Err(SlotguardError::InvalidRule("limit must be positive".into()));
        }
        if !window_seconds.is_finite() || window_seconds <= 0.0 {
            return Err(SlotguardError::InvalidRule(format!(
                "window_seconds must be a positive number, got {}",
                window_seconds
            )));
        }
        if window_seconds < MIN_WINDOW_SECONDS || window_seconds > MAX_WINDOW_SECONDS {
            return Err(SlotguardError::InvalidRule(format!(
                "window_seconds must be between {} and {}, got {}",
                MIN_WINDOW_SECONDS, MAX_WINDOW_SECONDS, window_seconds
            )));
        }
        Ok(Self {
            limit,
            window_seconds,
        })
    }

    /// Const constructor for the built-in tables. Arguments must be positive.
    const fn builtin(limit: u32, window_seconds: f64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Maximum tokens per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Seconds for an empty bucket to refill completely.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// The window in whole microseconds, the unit refill is computed in.
    pub fn window_micros(&self) -> i64 {
        ((self.window_seconds * 1_000_000.0).round() as i64).max(1)
    }

    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_seconds)
    }

    /// Tokens restored per second.
    pub fn refill_rate_per_second(&self) -> f64 {
        f64::from(self.limit) / self.window_seconds
    }

    /// Seconds it takes to restore a single token.
    pub fn seconds_per_token(&self) -> f64 {
        self.window_seconds / f64::from(self.limit)
    }
}

/// Classes of inbound API routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// Regular API traffic
    Standard,
    /// Administrative endpoints
    Admin,
}

impl RouteClass {
    /// Bucket scope for this class.
    pub fn scope(&self) -> &'static str {
        match self {
            RouteClass::Standard => "api.standard",
            RouteClass::Admin => "api.admin",
        }
    }
}

/// Classes of internal scheduler operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionClass {
    /// Creating meetings and adding participants
    Create,
    /// Fetching a meeting
    Read,
    /// Updating availability
    Update,
}

impl ActionClass {
    /// Bucket scope for this class.
    pub fn scope(&self) -> &'static str {
        match self {
            ActionClass::Create => "action.create",
            ActionClass::Read => "action.read",
            ActionClass::Update => "action.update",
        }
    }
}

/// Scheduler operations guarded by an [`ActionClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerOperation {
    /// Schedule a new meeting
    CreateMeeting,
    /// Look up a meeting by id
    GetMeeting,
    /// Add someone to a meeting
    AddParticipant,
    /// Record a participant's available slots
    UpdateAvailability,
}

impl SchedulerOperation {
    /// The class whose rule applies to this operation.
    pub fn class(&self) -> ActionClass {
        match self {
            SchedulerOperation::CreateMeeting => ActionClass::Create,
            SchedulerOperation::GetMeeting => ActionClass::Read,
            SchedulerOperation::AddParticipant => ActionClass::Create,
            SchedulerOperation::UpdateAvailability => ActionClass::Update,
        }
    }
}

/// Per-class rules for API routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLimits {
    #[serde(default = "default_standard_rule")]
    pub standard: RateLimitRule,
    #[serde(default = "default_admin_rule")]
    pub admin: RateLimitRule,
}

impl RouteLimits {
    /// The rule that applies to `class`.
    pub fn rule(&self, class: RouteClass) -> &RateLimitRule {
        match class {
            RouteClass::Standard => &self.standard,
            RouteClass::Admin => &self.admin,
        }
    }
}

impl Default for RouteLimits {
    fn default() -> Self {
        Self {
            standard: default_standard_rule(),
            admin: default_admin_rule(),
        }
    }
}

fn default_standard_rule() -> RateLimitRule {
    RateLimitRule::builtin(60, 60.0)
}

fn default_admin_rule() -> RateLimitRule {
    RateLimitRule::builtin(5, 60.0)
}

/// Per-class rules for internal operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLimits {
    #[serde(default = "default_create_rule")]
    pub create: RateLimitRule,
    #[serde(default = "default_read_rule")]
    pub read: RateLimitRule,
    #[serde(default = "default_update_rule")]
    pub update: RateLimitRule,
}

impl ActionLimits {
    /// The rule that applies to `class`.
    pub fn rule(&self, class: ActionClass) -> &RateLimitRule {
        match class {
            ActionClass::Create => &self.create,
            ActionClass::Read => &self.read,
            ActionClass::Update => &self.update,
        }
    }
}

impl Default for ActionLimits {
    fn default() -> Self {
        Self {
            create: default_create_rule(),
            read: default_read_rule(),
            update: default_update_rule(),
        }
    }
}

fn default_create_rule() -> RateLimitRule {
    RateLimitRule::builtin(10, 60.0)
}

fn default_read_rule() -> RateLimitRule {
    RateLimitRule::builtin(60, 60.0)
}

fn default_update_rule() -> RateLimitRule {
    RateLimitRule::builtin(30, 60.0)
}

/// A path prefix bound to a route class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    /// Path prefix, e.g. `/api/`
    pub prefix: String,
    /// Class applied to paths under the prefix
    pub class: RouteClass,
}

impl RouteMatch {
    /// Bind `prefix` to `class`.
    pub fn new(prefix: &str, class: RouteClass) -> Self {
        Self {
            prefix: prefix.to_string(),
            class,
        }
    }
}

/// Ordered prefix table; the first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    entries: Vec<RouteMatch>,
}

impl RouteTable {
    /// Build a table from entries in priority order.
    pub fn new(entries: Vec<RouteMatch>) -> Result<Self> {
        let table = Self { entries };
        table.validate()?;
        Ok(table)
    }

    /// Reject empty prefixes, which would swallow every path.
    pub fn validate(&self) -> Result<()> {
        match self.entries.iter().find(|e| e.prefix.is_empty()) {
            Some(bad) => Err(SlotguardError::Config(format!(
                "route prefix for class {:?} must not be empty",
                bad.class
            ))),
            None => Ok(()),
        }
    }

    /// Classify a request path. `None` means the path is not rate limited.
    pub fn classify(&self, path: &str) -> Option<RouteClass> {
        self.entries
            .iter()
            .find(|entry| path.starts_with(&entry.prefix))
            .map(|entry| entry.class)
    }

    /// Entries in priority order.
    pub fn entries(&self) -> &[RouteMatch] {
        &self.entries
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            entries: vec![
                RouteMatch::new("/api/setup-db", RouteClass::Admin),
                RouteMatch::new("/api/admin", RouteClass::Admin),
                RouteMatch::new("/api/", RouteClass::Standard),
            ],
        }
    }
}
