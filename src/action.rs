//! Rate limiting for internal scheduler operations.
//!
//! An operation is identified by its first argument: a string argument is used
//! as-is, a struct is identified by its `id` or `meetingId` field. Operations
//! whose argument names nothing share the [`SERVER_ACTION`] bucket.
//!
//! [`SERVER_ACTION`]: crate::ratelimit::SERVER_ACTION

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::ratelimit::{
    ActionClass, ActionLimits, BucketKey, BucketStore, ClientSource, InMemoryBucketStore,
    RateLimiter, Verdict,
};

/// Failure of a rate-limited operation.
#[derive(Error, Debug)]
pub enum ActionError<E> {
    /// The operation was not run because its bucket is empty
    #[error("Rate limit exceeded, please try again later")]
    RateLimited {
        /// The rejecting verdict, for retry timing
        verdict: Verdict,
    },

    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

impl<E> ActionError<E> {
    /// Whether this is a rate limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ActionError::RateLimited { .. })
    }
}

/// Guards internal operations with per-class token buckets.
pub struct ActionGuard<S = InMemoryBucketStore> {
    limiter: Arc<RateLimiter<S>>,
    limits: ActionLimits,
}

impl<S: BucketStore + 'static> ActionGuard<S> {
    /// Create a guard sharing `limiter` with the rest of the service.
    pub fn new(limiter: Arc<RateLimiter<S>>, limits: ActionLimits) -> Self {
        Self { limiter, limits }
    }

    /// The per-class rules in effect.
    pub fn limits(&self) -> &ActionLimits {
        &self.limits
    }

    /// Check the `class` rule for the caller identified by `first_arg`.
    pub fn admit<A>(&self, class: ActionClass, first_arg: &A) -> Verdict
    where
        A: Serialize + ?Sized,
    {
        let arg = serde_json::to_value(first_arg).ok();
        let client = ClientSource::FirstArgument(arg.as_ref()).resolve();
        let key = BucketKey::new(class.scope(), client);

        let verdict = self.limiter.check(&key, self.limits.rule(class));
        if !verdict.allowed {
            warn!(
                key = %key,
                reset_at = %verdict.reset_at,
                "Operation rejected by rate limit"
            );
        }
        verdict
    }

    /// Run `action` if the caller identified by `first_arg` has a token for `class`.
    ///
    /// On rejection `action` is never invoked. Otherwise its result is returned
    /// unchanged, with errors wrapped in [`ActionError::Inner`].
    pub async fn run<A, F, Fut, T, E>(
        &self,
        class: ActionClass,
        first_arg: &A,
        action: F,
    ) -> Result<T, ActionError<E>>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let verdict = self.admit(class, first_arg);
        if !verdict.allowed {
            return Err(ActionError::RateLimited { verdict });
        }
        action().await.map_err(ActionError::Inner)
    }

    /// Turn a single-argument operation into a rate-limited one.
    ///
    /// The returned function can be called any number of times; each call is
    /// checked against `class` using its argument as the identity.
    pub fn wrap<A, F, Fut, T, E>(
        self: &Arc<Self>,
        class: ActionClass,
        action: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, ActionError<E>>> + Send + Sync
    where
        A: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let guard = Arc::clone(self);
        let action = Arc::new(action);

        move |arg: A| {
            let guard = Arc::clone(&guard);
            let action = Arc::clone(&action);
            async move {
                let verdict = guard.admit(class, &arg);
                if !verdict.allowed {
                    return Err(ActionError::RateLimited { verdict });
                }
                action(arg).await.map_err(ActionError::Inner)
            }
            .boxed()
        }
    }
}
