//! Host-supplied script context
//!
//! The host passes a JSON object describing the invocation (who ran the
//! script, where, with what output format) in an environment variable. The
//! channel protocol does not use it; scripts do.

use serde::de::DeserializeOwned;
use serde_json::Value;

use k4_utils::{K4Error, Result};

use crate::config::ClientConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostContext {
    value: Value,
}

impl HostContext {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Read the context named by `config.context_var` from the process
    /// environment
    pub fn from_env(config: &ClientConfig) -> Result<Self> {
        let raw = std::env::var(&config.context_var).ok();
        Self::from_raw(&config.context_var, raw.as_deref(), config.context_required)
    }

    /// Parse a raw context value read from `var`
    ///
    /// An absent value is an error when `required`, and `null` otherwise.
    pub fn from_raw(var: &str, raw: Option<&str>, required: bool) -> Result<Self> {
        match raw {
            Some(raw) => serde_json::from_str(raw)
                .map(Self::new)
                .map_err(|e| K4Error::context(var, e.to_string())),
            None if required => Err(K4Error::context(var, "not set")),
            None => {
                tracing::debug!(var, "Host context not set, using null");
                Ok(Self::default())
            }
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Look up a nested field by JSON pointer, e.g. `/source/channelId`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.value.pointer(pointer)
    }

    /// Deserialize the whole context into a typed structure
    pub fn deserialize<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
