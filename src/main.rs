use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slotguard::config::ServiceConfig;
use slotguard::http::{router, AppState, HttpServer, RequestGuard};
use slotguard::ratelimit::{RateLimiter, Reaper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "slotguard", about = "Token bucket rate limiting for the scheduler API")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address, overrides the configuration file
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Slotguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref()).inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let rate_limiting = config.rate_limiting;
    let limiter = Arc::new(RateLimiter::new());
    info!("Rate limiter initialized");

    let reaper = rate_limiting.reaper.enabled.then(|| {
        info!(
            interval_secs = rate_limiting.reaper.sweep_interval_secs,
            idle_windows = rate_limiting.reaper.idle_windows,
            "Starting bucket reaper"
        );
        Reaper::new(
            limiter.clone(),
            rate_limiting.reaper.sweep_interval(),
            rate_limiting.reaper.idle_windows,
        )
        .spawn()
    });

    let guard = Arc::new(RequestGuard::new(
        limiter.clone(),
        rate_limiting.routes,
        rate_limiting.route_table,
    ));
    let state = AppState {
        limiter,
        idle_windows: rate_limiting.reaper.idle_windows,
    };
    let server = HttpServer::new(config.server.http_addr, router(state, guard));

    // Run the server with graceful shutdown on Ctrl+C
    let result = server.serve_with_shutdown(shutdown_signal()).await;

    if let Some(handle) = reaper {
        handle.abort();
    }
    result?;

    info!("Slotguard stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
