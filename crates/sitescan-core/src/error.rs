//! Core error types for Sitescan.
//!
//! This module defines the central error type shared by every crate in the
//! workspace. Subsystem crates keep their own error enums and convert into
//! `SitescanError` at crate boundaries.

use thiserror::Error;

/// Central error type for all Sitescan operations.
#[derive(Error, Debug)]
pub enum SitescanError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors (bad URL, unknown capability tag, malformed id)
    #[error("validation error: {0}")]
    Validation(String),

    /// Request forgery protection rejected the target host
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),

    /// Invalid status transition on an analysis record
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Database errors (connection, queries, migrations)
    #[error("database error: {0}")]
    Database(String),

    /// Queue errors (enqueue, dequeue, retry scheduling)
    #[error("queue error: {0}")]
    Queue(String),

    /// Browser automation errors (launch, navigation, evaluation)
    #[error("browser error: {0}")]
    Browser(String),

    /// Network errors (HTTP requests, DNS)
    #[error("network error: {0}")]
    Network(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Config file not found
    #[error("config file not found at {path}")]
    NotFound {
        /// Path where config was expected
        path: String,
    },

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `SitescanError`.
pub type Result<T> = std::result::Result<T, SitescanError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
