//! Named service stubs
//!
//! The host registers each service under a name and exposes its methods as
//! `Service.Method`, so `client.service("Money").call("GetBalance", ..)`
//! is the same call as `client.call("Money.GetBalance", ..)`.

use std::os::unix::io::RawFd;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client::{Client, PendingCall};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Service<'a> {
    client: &'a Client,
    name: String,
}

impl<'a> Service<'a> {
    pub(crate) fn new(client: &'a Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full wire method name for `method`
    pub fn method_name(&self, method: &str) -> String {
        format!("{}.{}", self.name, method)
    }

    pub async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        self.client.call(&self.method_name(method), params).await
    }

    pub async fn call_as<T, P>(&self, method: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        self.client.call_as(&self.method_name(method), params).await
    }

    pub async fn call_with_fds<P: Serialize>(
        &self,
        method: &str,
        params: P,
        fds: &[RawFd],
    ) -> Result<Value> {
        self.client
            .call_with_fds(&self.method_name(method), params, fds)
            .await
    }

    pub async fn request<P: Serialize>(&self, method: &str, params: P) -> Result<PendingCall> {
        self.client.request(&self.method_name(method), params).await
    }
}
