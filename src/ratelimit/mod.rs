//! Token bucket rate limiting: state, storage, and the admission engine.

mod bucket;
mod clock;
mod identifier;
mod limiter;
mod reaper;
mod rules;
mod store;

pub use bucket::{admit, BucketKey, BucketState, Verdict};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identifier::{ClientSource, ANONYMOUS, SERVER_ACTION};
pub use limiter::RateLimiter;
pub use reaper::Reaper;
pub use rules::{
    ActionClass, ActionLimits, RateLimitRule, RouteClass, RouteLimits, RouteMatch, RouteTable,
    SchedulerOperation, MAX_WINDOW_SECONDS, MIN_WINDOW_SECONDS,
};
pub use store::{BucketStore, InMemoryBucketStore};
