//! Request and response messages exchanged with the host
//!
//! Requests are `{"id", "method", "params"}` objects where `params` always
//! holds exactly one argument. Responses carry the echoed `id`, an `error`
//! that is `null` on success, and the `result`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier correlating a request with its response
pub type RequestId = u64;

/// Id echoed back in a response
///
/// Signed so that a negative id, which can never match a request, still
/// parses and is dropped as stale instead of failing the pending call.
pub type ResponseId = i64;

/// A single call to a host service method
///
/// Field order is part of the wire format: `id`, `method`, `params`.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a, P> {
    pub id: RequestId,
    pub method: &'a str,
    pub params: [P; 1],
}

impl<'a, P: Serialize> Request<'a, P> {
    pub fn new(id: RequestId, method: &'a str, params: P) -> Self {
        Self {
            id,
            method,
            params: [params],
        }
    }
}

/// A response parsed from one inbound frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: ResponseId,

    /// `None` when the host sent `null` or omitted the field
    #[serde(default)]
    pub error: Option<Value>,

    #[serde(default)]
    pub result: Value,
}

impl Response {
    /// Parse a response from the payload of a frame
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Split into the call outcome: `Ok(result)` or `Err(error)`
    pub fn into_outcome(self) -> Result<Value, Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
