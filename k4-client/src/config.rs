//! Client configuration
//!
//! Defaults match what the host sets up for every script: the channel on
//! fd 3, the context in `$K4_CONTEXT`, bare JSON requests. Each setting can
//! be overridden from the environment.

use std::os::unix::io::RawFd;

use k4_protocol::{RequestFraming, MAX_FRAME_LEN};
use k4_utils::{K4Error, Result};

/// Descriptor the host attaches the channel to
pub const DEFAULT_FD: RawFd = 3;

/// Variable the host stores the script context in
pub const DEFAULT_CONTEXT_VAR: &str = "K4_CONTEXT";

pub const FD_ENV: &str = "K4_RPC_FD";
pub const CONTEXT_VAR_ENV: &str = "K4_CONTEXT_VAR";
pub const FRAMING_ENV: &str = "K4_RPC_FRAMING";
pub const MAX_FRAME_LEN_ENV: &str = "K4_MAX_FRAME_LEN";

/// Settings for constructing a [`Client`](crate::Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Inherited descriptor carrying the channel
    pub fd: RawFd,
    /// Environment variable holding the JSON context
    pub context_var: String,
    /// Fail construction when the context variable is unset
    pub context_required: bool,
    /// Delimiting of outbound requests
    pub framing: RequestFraming,
    /// Largest inbound frame accepted
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fd: DEFAULT_FD,
            context_var: DEFAULT_CONTEXT_VAR.into(),
            context_required: true,
            framing: RequestFraming::Raw,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `K4_RPC_FD`, `K4_CONTEXT_VAR`,
    /// `K4_RPC_FRAMING` and `K4_MAX_FRAME_LEN`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(FD_ENV) {
            config.fd = raw.trim().parse::<RawFd>().ok().filter(|fd| *fd >= 0).ok_or_else(|| {
                K4Error::config(format!("{} must be a non-negative integer, got '{}'", FD_ENV, raw))
            })?;
        }

        if let Some(var) = lookup(CONTEXT_VAR_ENV) {
            if var.is_empty() {
                return Err(K4Error::config(format!("{} must not be empty", CONTEXT_VAR_ENV)));
            }
            config.context_var = var;
        }

        if let Some(raw) = lookup(FRAMING_ENV) {
            config.framing = raw
                .parse()
                .map_err(|e| K4Error::config(format!("{}: {}", FRAMING_ENV, e)))?;
        }

        if let Some(raw) = lookup(MAX_FRAME_LEN_ENV) {
            config.max_frame_len = raw.trim().parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                K4Error::config(format!(
                    "{} must be a positive integer, got '{}'",
                    MAX_FRAME_LEN_ENV, raw
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_fd(mut self, fd: RawFd) -> Self {
        self.fd = fd;
        self
    }

    pub fn with_context_var(mut self, var: impl Into<String>) -> Self {
        self.context_var = var.into();
        self
    }

    pub fn with_context_required(mut self, required: bool) -> Self {
        self.context_required = required;
        self
    }

    pub fn with_framing(mut self, framing: RequestFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}
