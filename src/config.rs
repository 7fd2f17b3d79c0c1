//! Configuration management for Slotguard.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SlotguardError};
use crate::ratelimit::{ActionLimits, RouteLimits, RouteTable};

/// Prefix for environment variable overrides, e.g. `SLOTGUARD__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "SLOTGUARD";

/// Main configuration for the Slotguard service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Rules for API route classes
    #[serde(default)]
    pub routes: RouteLimits,

    /// Path prefixes mapped to route classes
    #[serde(default)]
    pub route_table: RouteTable,

    /// Rules for internal operation classes
    #[serde(default)]
    pub actions: ActionLimits,

    /// Idle bucket eviction
    #[serde(default)]
    pub reaper: ReaperConfig,
}

/// Idle bucket eviction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Run the background sweep
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Buckets idle for this many of their windows are evicted
    #[serde(default = "default_idle_windows")]
    pub idle_windows: u32,
}

impl ReaperConfig {
    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            sweep_interval_secs: default_sweep_interval(),
            idle_windows: default_idle_windows(),
        }
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_windows() -> u32 {
    2
}

impl ServiceConfig {
    /// Load configuration from an optional file, overlaid with `SLOTGUARD__*` environment variables.
    ///
    /// The file format follows its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config: ServiceConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlotguardError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.route_table.validate()?;

        let reaper = &self.rate_limiting.reaper;
        if reaper.sweep_interval_secs == 0 {
            return Err(SlotguardError::Config(
                "reaper.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if reaper.idle_windows == 0 {
            return Err(SlotguardError::Config(
                "reaper.idle_windows must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
