//! Call-level errors
//!
//! Every failure of a single call is delivered to that call and to no other.
//! [`ClientError`] additionally covers setup, for callers that construct and
//! call in one go.

use std::fmt;

use serde_json::Value;

use k4_protocol::{CodecError, RequestId, ResponseId};
use k4_utils::K4Error;

/// Why a client stopped accepting calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called
    Requested,
    /// The host closed its end of the channel
    EndOfStream,
    /// Reading from the channel failed
    Transport(String),
    /// The client was dropped while a call was outstanding
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "client closed"),
            Self::EndOfStream => write!(f, "host closed the channel"),
            Self::Transport(msg) => write!(f, "channel failed: {}", msg),
            Self::Dropped => write!(f, "client dropped"),
        }
    }
}

/// Failure of a single call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("existing request currently pending (id {pending})")]
    Busy { pending: RequestId },

    #[error("failed to parse response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("mismatched id: expected {expected}, got {got}")]
    IdMismatch { expected: RequestId, got: ResponseId },

    #[error("host returned error: {}", display_error_value(.0))]
    Application(Value),

    #[error("transport error: {0}")]
    Transport(#[source] CodecError),

    #[error("client closed: {0}")]
    Closed(CloseReason),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CallError {
    pub(crate) fn transport_io(err: std::io::Error) -> Self {
        Self::Transport(CodecError::Io(err))
    }

    pub(crate) fn from_encode(err: CodecError) -> Self {
        match err {
            CodecError::Json(e) => Self::Encode(e),
            other => Self::Transport(other),
        }
    }

    /// The host's error value, if this is an application error
    pub fn application_value(&self) -> Option<&Value> {
        match self {
            Self::Application(value) => Some(value),
            _ => None,
        }
    }

    /// True when the client can still accept calls after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. }
                | Self::Parse(_)
                | Self::IdMismatch { .. }
                | Self::Application(_)
                | Self::Encode(_)
                | Self::Decode(_)
        )
    }
}

// The host reports errors as plain strings; show those without quotes.
fn display_error_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Either a setup failure or a call failure
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Setup(#[from] K4Error),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Result type alias for call operations
pub type Result<T> = std::result::Result<T, CallError>;
