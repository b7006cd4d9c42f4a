//! Error types for core operations.

use thiserror::Error;

/// Errors raised while loading configuration or preparing storage.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required environment variable is missing or empty.
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),

    /// A setting is present but cannot be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidSetting {
        /// Name of the environment variable.
        name: &'static str,
        /// Offending raw value.
        value: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
