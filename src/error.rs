//! Error types for the Slotguard service.

use thiserror::Error;

/// Main error type for Slotguard operations.
#[derive(Error, Debug)]
pub enum SlotguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limit rule with a non-positive limit or window
    #[error("Invalid rate limit rule: {0}")]
    InvalidRule(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SlotguardError {
    fn from(err: config::ConfigError) -> Self {
        SlotguardError::Config(err.to_string())
    }
}

/// Result type alias for Slotguard operations.
pub type Result<T> = std::result::Result<T, SlotguardError>;
