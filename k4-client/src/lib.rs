//! k4-client: RPC client for scripts launched by the k4 host
//!
//! The host starts each script with a connected socket on a well-known
//! descriptor and a JSON context in the environment. A [`Client`] adopts
//! that descriptor, sends one request at a time, and matches each response
//! to the call waiting on it.
//!
//! ```no_run
//! # async fn run() -> Result<(), k4_client::ClientError> {
//! let client = k4_client::Client::from_env()?;
//! let balance = client
//!     .service("Money")
//!     .call("GetBalance", serde_json::json!({"accountHandle": "me"}))
//!     .await?;
//! println!("{balance}");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod context;
mod correlator;
pub mod error;
mod service;
mod supervisor;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientState, PendingCall};
pub use config::ClientConfig;
pub use context::HostContext;
pub use correlator::Verdict;
pub use error::{CallError, ClientError, CloseReason, Result};
pub use service::Service;
pub use supervisor::{Child, ChildExit, ChildHandle, Supervisor};

pub use k4_protocol::{RequestFraming, RequestId, MAX_FRAME_LEN};
