//! Error types for k4
//!
//! Covers everything that can go wrong while setting a script up to talk to
//! its host: reading configuration and context from the environment,
//! adopting the inherited descriptor, and installing logging. Per-call
//! failures live in `k4-client`.

use std::path::PathBuf;

/// Main error type for k4 setup operations
#[derive(Debug, thiserror::Error)]
pub enum K4Error {
    // === Channel Errors ===

    #[error("Host channel unavailable on fd {fd}: {source}")]
    ChannelUnavailable {
        fd: i32,
        source: std::io::Error,
    },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid host context in ${var}: {message}")]
    Context { var: String, message: String },

    // === Logging Errors ===

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install logger: {0}")]
    Logging(String),
}

impl K4Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a context error for the given environment variable
    pub fn context(var: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Context {
            var: var.into(),
            message: msg.into(),
        }
    }
}

/// Result type alias using K4Error
pub type Result<T> = std::result::Result<T, K4Error>;
