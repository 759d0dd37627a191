//! k4-protocol: Wire definitions for the k4 host channel
//!
//! A script talks to its host over an inherited stream socket. Requests are
//! JSON objects naming a `Service.Method` and a single argument; responses
//! come back as newline-terminated JSON objects echoing the request id.

pub mod codec;
pub mod messages;

// Re-export main types at crate root
pub use codec::{CodecError, Frame, RequestEncoder, RequestFraming, ResponseCodec, MAX_FRAME_LEN};
pub use messages::{Request, RequestId, Response, ResponseId};
