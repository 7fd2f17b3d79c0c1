//! HTTP enforcement: the request middleware and the server that hosts it.

mod middleware;
mod server;

pub use middleware::{
    enforce, Admission, Identify, Rejection, RequestGuard, X_FORWARDED_FOR, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{router, AppState, HttpServer};
