//! Logging setup for scripts
//!
//! A script's stdout is its reply and the host shows stderr to the user as
//! well, so logging is quiet unless `K4_LOG` asks for more. Logs can be moved
//! off stderr entirely into a file under the log directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{paths, K4Error, Result};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "K4_LOG";

/// Filter used when `K4_LOG` is unset or empty
pub const DEFAULT_FILTER: &str = "warn";

/// Where log lines are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    /// Appended to this file, created along with its directory if needed
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `warn,k4_client=debug`
    pub filter: String,
    pub sink: LogSink,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.into(),
            sink: LogSink::Stderr,
        }
    }
}

impl LogConfig {
    /// Filter from `K4_LOG`, written to stderr
    pub fn from_env() -> Self {
        Self::with_filter_override(std::env::var(LOG_ENV).ok())
    }

    fn with_filter_override(filter: Option<String>) -> Self {
        match filter {
            Some(filter) if !filter.trim().is_empty() => Self {
                filter,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Write to `path` instead of stderr
    pub fn to_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = LogSink::File(path.into());
        self
    }

    /// Write to `name` inside [`paths::log_dir`]
    pub fn in_log_dir(self, name: &str) -> Self {
        self.to_file(paths::log_dir().join(name))
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| K4Error::config(format!("Invalid {} filter '{}': {}", LOG_ENV, self.filter, e)))
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let layer = fmt::layer().with_target(true);

    let installed = match &config.sink {
        LogSink::Stderr => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_writer(std::io::stderr))
            .try_init(),
        LogSink::File(path) => {
            let file = open_append(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.with_writer(file).with_ansi(false))
                .try_init()
        }
    };

    installed.map_err(|e| K4Error::Logging(e.to_string()))
}

fn open_append(path: &Path) -> Result<File> {
    let log_err = |source| K4Error::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(log_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)
}
