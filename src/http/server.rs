//! HTTP server hosting the rate limited API surface.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{enforce, RequestGuard};
use crate::error::{Result, SlotguardError};
use crate::ratelimit::{InMemoryBucketStore, RateLimiter};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    /// Idle windows used by on-demand sweeps
    pub idle_windows: u32,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct BucketsResponse {
    buckets: usize,
}

#[derive(Serialize)]
struct SweepResponse {
    removed: usize,
    remaining: usize,
}

/// Build the router with the rate limiting layer applied to every route.
pub fn router(state: AppState, guard: Arc<RequestGuard>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/test-rate-limit", get(test_rate_limit_handler))
        .route("/api/admin/buckets", get(buckets_handler))
        .route("/api/admin/sweep", post(sweep_handler))
        .layer(middleware::from_fn_with_state(
            guard,
            enforce::<InMemoryBucketStore>,
        ))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn test_rate_limit_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "message": "Request admitted",
    }))
}

async fn buckets_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(BucketsResponse {
        buckets: state.limiter.bucket_count(),
    })
}

async fn sweep_handler(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.limiter.sweep(state.idle_windows.max(1));
    info!(removed, "Manual bucket sweep");
    Json(SweepResponse {
        removed,
        remaining: state.limiter.bucket_count(),
    })
}

/// HTTP server for the scheduler API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a server that will serve `router` on `addr`.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            SlotguardError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                SlotguardError::Io(e)
            })
    }
}
