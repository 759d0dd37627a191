//! k4-utils: Common utilities shared across k4 crates
//!
//! This crate provides:
//! - Unified setup error type ([`K4Error`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - Log directory resolution ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{K4Error, Result};
pub use logging::{init_logging, LogConfig, LogSink};
pub use paths::log_dir;
