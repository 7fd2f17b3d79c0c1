//! Rate limiting middleware for inbound API requests.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{trace, warn};

use crate::ratelimit::{
    BucketKey, BucketStore, ClientSource, InMemoryBucketStore, RateLimiter, RouteClass,
    RouteLimits, RouteTable, Verdict,
};

/// Header carrying the bucket size.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Header carrying whole tokens left.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Header carrying the reset instant in epoch milliseconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Header the default identifier is read from.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Custom client identification, replacing the forwarded-address lookup.
pub type Identify = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

/// Outcome of checking a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Forward the request
    Continue(Verdict),
    /// Answer with 429
    Reject(Rejection),
}

/// A 429 answer with retry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The rejecting verdict
    pub verdict: Verdict,
    /// Whole seconds until a token is available
    pub retry_after_secs: u64,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": "Too many requests",
            "message": "Rate limit exceeded, please try again later",
        }));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();

        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.verdict.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.verdict.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.verdict.reset_millis()));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        response
    }
}

/// Decides whether inbound requests may proceed.
pub struct RequestGuard<S = InMemoryBucketStore> {
    limiter: Arc<RateLimiter<S>>,
    limits: RouteLimits,
    table: RouteTable,
    identify: Option<Identify>,
}

impl<S: BucketStore + 'static> RequestGuard<S> {
    /// Create a guard sharing `limiter` with the rest of the service.
    pub fn new(limiter: Arc<RateLimiter<S>>, limits: RouteLimits, table: RouteTable) -> Self {
        Self {
            limiter,
            limits,
            table,
            identify: None,
        }
    }

    /// Identify clients with `identify` instead of the forwarded address.
    pub fn with_identifier<F>(mut self, identify: F) -> Self
    where
        F: Fn(&HeaderMap) -> String + Send + Sync + 'static,
    {
        self.identify = Some(Arc::new(identify));
        self
    }

    /// Resolve the client identifier for a request.
    pub fn client_id(&self, headers: &HeaderMap) -> String {
        match &self.identify {
            Some(identify) => identify(headers),
            None => {
                let forwarded = headers
                    .get(X_FORWARDED_FOR)
                    .and_then(|value| value.to_str().ok());
                ClientSource::ForwardedFor(forwarded).resolve()
            }
        }
    }

    /// The route class for `path`, if it is rate limited at all.
    pub fn classify(&self, path: &str) -> Option<RouteClass> {
        self.table.classify(path)
    }

    /// Check the `class` rule for the client behind `headers`.
    pub fn check(&self, class: RouteClass, headers: &HeaderMap) -> Admission {
        let key = BucketKey::new(class.scope(), self.client_id(headers));
        let verdict = self.limiter.check(&key, self.limits.rule(class));

        if verdict.allowed {
            trace!(key = %key, remaining = verdict.remaining, "Request admitted");
            return Admission::Continue(verdict);
        }

        let retry_after_secs = verdict.retry_after_secs(self.limiter.now());
        warn!(
            key = %key,
            retry_after_secs,
            "Request rejected by rate limit"
        );
        Admission::Reject(Rejection {
            verdict,
            retry_after_secs,
        })
    }
}

/// Axum middleware: answer 429 for rejected requests, otherwise run the inner service.
pub async fn enforce<S: BucketStore + 'static>(
    State(guard): State<Arc<RequestGuard<S>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(class) = guard.classify(request.uri().path()) {
        if let Admission::Reject(rejection) = guard.check(class, request.headers()) {
            return rejection.into_response();
        }
    }
    next.run(request).await
}
