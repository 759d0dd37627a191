//! Stub for the host's process supervisor
//!
//! A script can start another stored script as its child. The child's
//! stdin, stdout and stderr are descriptors chosen by the caller and handed
//! to the host right after the `Spawn` request.

use std::os::unix::io::{AsFd, AsRawFd};

use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::{CallError, Result};
use crate::service::Service;

const SERVICE: &str = "Supervisor";

/// Host-assigned id of a spawned child
pub type ChildHandle = i64;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpawnParams<'a> {
    owner_name: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct Spawned {
    handle: ChildHandle,
}

#[derive(Serialize)]
struct HandleParams {
    handle: ChildHandle,
}

#[derive(Serialize)]
struct SignalParams {
    handle: ChildHandle,
    signal: i32,
}

/// How a child script finished
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildExit {
    /// Raw status as reported by `wait(2)`
    pub wait_status: u32,
    #[serde(default)]
    pub time_limit_exceeded: bool,
    /// Output format the child selected, e.g. `"text"`
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub private: bool,
}

impl ChildExit {
    /// Exit code, if the child exited on its own
    pub fn exit_code(&self) -> Option<i32> {
        let status = self.wait_status as libc::c_int;
        libc::WIFEXITED(status).then(|| libc::WEXITSTATUS(status))
    }

    /// Signal that terminated the child, if any
    pub fn term_signal(&self) -> Option<i32> {
        let status = self.wait_status as libc::c_int;
        libc::WIFSIGNALED(status).then(|| libc::WTERMSIG(status))
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct Supervisor<'a> {
    service: Service<'a>,
}

impl<'a> Supervisor<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            service: client.service(SERVICE),
        }
    }

    /// Start the script `name` owned by `owner_name`
    ///
    /// The host duplicates the three descriptors, so the caller keeps its
    /// own copies and may close them once this returns.
    pub async fn spawn(
        &self,
        owner_name: &str,
        name: &str,
        stdin: impl AsFd,
        stdout: impl AsFd,
        stderr: impl AsFd,
    ) -> Result<Child<'a>> {
        let fds = [
            stdin.as_fd().as_raw_fd(),
            stdout.as_fd().as_raw_fd(),
            stderr.as_fd().as_raw_fd(),
        ];
        let params = SpawnParams { owner_name, name };

        let value = self.service.call_with_fds("Spawn", params, &fds).await?;
        let spawned: Spawned = serde_json::from_value(value).map_err(CallError::Decode)?;

        tracing::debug!(owner_name, name, handle = spawned.handle, "Spawned child script");
        Ok(Child {
            service: self.service.clone(),
            handle: spawned.handle,
        })
    }
}

/// A child script started through [`Supervisor::spawn`]
#[derive(Debug, Clone)]
pub struct Child<'a> {
    service: Service<'a>,
    handle: ChildHandle,
}

impl Child<'_> {
    pub fn handle(&self) -> ChildHandle {
        self.handle
    }

    /// Wait for the child to finish
    pub async fn wait(&self) -> Result<ChildExit> {
        self.service
            .call_as("Wait", HandleParams { handle: self.handle })
            .await
    }

    /// Send `signal` (e.g. `libc::SIGTERM`) to the child
    pub async fn signal(&self, signal: i32) -> Result<()> {
        let params = SignalParams {
            handle: self.handle,
            signal,
        };
        self.service.call("Signal", params).await.map(drop)
    }
}
