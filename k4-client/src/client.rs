//! Client for the host channel
//!
//! One call may be in flight at a time. A call is accepted only when no
//! other call is pending; its request is written to the channel and its
//! outcome is delivered later by the read loop through a oneshot channel.
//!
//! The read loop owns the receive buffer. It splits the inbound stream into
//! frames, parses each as a response, and hands it to the correlator, which
//! decides whether the response answers the pending call.

use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;

use k4_protocol::{Frame, Request, RequestEncoder, RequestId, ResponseCodec};

use crate::config::ClientConfig;
use crate::context::HostContext;
use crate::correlator::Correlator;
use crate::error::{CallError, CloseReason, Result};
use crate::service::Service;
use crate::supervisor::Supervisor;
use crate::transport::{self, BoxedReader, BoxedWriter, HostWriter};

/// Observable state of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// No call in flight
    Idle,
    /// Waiting for the response to this request id
    Awaiting(RequestId),
    /// No further calls will be accepted
    Closed(CloseReason),
}

#[derive(Default)]
struct Shared {
    next_id: RequestId,
    correlator: Correlator,
    closed: Option<CloseReason>,
}

impl Shared {
    fn state(&self) -> ClientState {
        if let Some(reason) = &self.closed {
            return ClientState::Closed(reason.clone());
        }
        match self.correlator.pending_id() {
            Some(id) => ClientState::Awaiting(id),
            None => ClientState::Idle,
        }
    }
}

/// Client for RPC calls to the host
pub struct Client {
    shared: Arc<Mutex<Shared>>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    encoder: RequestEncoder,
    context: HostContext,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Cancelled by `close()` to cut short writes stuck on a full channel
    shutdown: CancellationToken,
}

impl Client {
    /// Build a client from the environment the host set up
    ///
    /// Reads configuration overrides and the host context from the
    /// environment, then adopts the inherited channel descriptor.
    pub fn from_env() -> k4_utils::Result<Self> {
        let config = ClientConfig::from_env()?;
        Self::inherit(&config)
    }

    /// Build a client on the inherited descriptor named by `config`
    pub fn inherit(config: &ClientConfig) -> k4_utils::Result<Self> {
        let context = HostContext::from_env(config)?;
        let stream = transport::inherit(config.fd)?;
        Ok(Self::from_unix_stream(stream, context, config))
    }

    /// Build a client on a connected Unix socket
    ///
    /// Unlike [`Client::from_stream`], the client can pass descriptors over
    /// this channel.
    pub fn from_unix_stream(stream: UnixStream, context: HostContext, config: &ClientConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self::from_parts(reader, writer, context, config)
    }

    /// Build a client on an already-connected duplex stream
    pub fn from_stream<S>(stream: S, context: HostContext, config: &ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = transport::split_boxed(stream);
        Self::from_parts(reader, writer, context, config)
    }

    /// Build a client on separate read and write halves
    ///
    /// Spawns the read loop, so this must be called within a tokio runtime.
    pub fn from_parts<R, W>(reader: R, writer: W, context: HostContext, config: &ClientConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: HostWriter + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared::default()));

        let reader: BoxedReader = Box::new(reader);
        let frames = FramedRead::new(
            reader,
            ResponseCodec::with_max_frame_len(config.max_frame_len),
        );
        let task = tokio::spawn(read_loop(frames, Arc::clone(&shared)));

        let writer: BoxedWriter = Box::new(writer);

        Self {
            shared,
            writer: AsyncMutex::new(Some(writer)),
            encoder: RequestEncoder::new(config.framing),
            context,
            reader_task: Mutex::new(Some(task)),
            shutdown: CancellationToken::new(),
        }
    }

    /// The context the host passed to this script
    pub fn context(&self) -> &HostContext {
        &self.context
    }

    pub fn state(&self) -> ClientState {
        self.shared.lock().state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    /// The id the next accepted call will use
    pub fn next_id(&self) -> RequestId {
        self.shared.lock().next_id
    }

    /// A stub issuing `"<name>.<method>"` calls
    pub fn service(&self, name: impl Into<String>) -> Service<'_> {
        Service::new(self, name)
    }

    /// Stub for the host's process supervisor
    pub fn supervisor(&self) -> Supervisor<'_> {
        Supervisor::new(self)
    }

    /// Call `method` and wait for its result
    pub async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        self.request(method, params).await?.await
    }

    /// Call `method` and deserialize its result
    pub async fn call_as<T, P>(&self, method: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(CallError::Decode)
    }

    /// Call `method`, handing the host `fds` right after the request
    pub async fn call_with_fds<P: Serialize>(
        &self,
        method: &str,
        params: P,
        fds: &[RawFd],
    ) -> Result<Value> {
        self.request_with_fds(method, params, fds).await?.await
    }

    /// Send a request without waiting for its response
    ///
    /// Fails with [`CallError::Busy`] if another call is pending; in that
    /// case nothing is written and the id counter is unchanged. On success
    /// the returned [`PendingCall`] resolves once the response arrives.
    pub async fn request<P: Serialize>(&self, method: &str, params: P) -> Result<PendingCall> {
        self.request_with_fds(method, params, &[]).await
    }

    /// Send a request followed by a descriptor message carrying `fds`
    ///
    /// The host reads the descriptors as part of the request, so they are
    /// sent before anything else can be written. If passing them fails the
    /// request is already on the wire: its id stays used and the call is
    /// abandoned.
    pub async fn request_with_fds<P: Serialize>(
        &self,
        method: &str,
        params: P,
        fds: &[RawFd],
    ) -> Result<PendingCall> {
        let (id, payload, rx) = self.accept(method, params)?;

        tracing::debug!(id, method, bytes = payload.len(), fds = fds.len(), "Sending request");

        if let Err(err) = self.write(&payload).await {
            tracing::warn!(id, method, error = %err, "Failed to send request");
            let mut shared = self.shared.lock();
            shared.correlator.abandon(id);
            // Unsent requests do not consume their id
            if shared.next_id == id + 1 {
                shared.next_id = id;
            }
            return Err(err);
        }

        if !fds.is_empty() {
            if let Err(err) = self.pass_fds(fds).await {
                tracing::warn!(id, method, error = %err, "Failed to pass descriptors");
                self.shared.lock().correlator.abandon(id);
                return Err(err);
            }
        }

        Ok(PendingCall { id, rx })
    }

    fn accept<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<(RequestId, Bytes, oneshot::Receiver<Result<Value>>)> {
        let mut shared = self.shared.lock();

        if let Some(reason) = &shared.closed {
            return Err(CallError::Closed(reason.clone()));
        }
        if let Some(pending) = shared.correlator.pending_id() {
            tracing::debug!(pending, method, "Rejecting call while another is pending");
            return Err(CallError::Busy { pending });
        }

        let id = shared.next_id;
        let mut payload = BytesMut::new();
        let mut encoder = self.encoder;
        encoder
            .encode(Request::new(id, method, params), &mut payload)
            .map_err(CallError::from_encode)?;

        let (tx, rx) = oneshot::channel();
        shared.correlator.begin(id, tx);
        shared.next_id = id + 1;

        Ok((id, payload.freeze(), rx))
    }

    async fn lock_writer(&self) -> Result<AsyncMutexGuard<'_, Option<BoxedWriter>>> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CallError::Closed(self.close_reason())),
            guard = self.writer.lock() => Ok(guard),
        }
    }

    async fn write(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.lock_writer().await?;
        let Some(writer) = guard.as_mut() else {
            return Err(CallError::Closed(self.close_reason()));
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CallError::Closed(self.close_reason())),
            sent = write_flush(writer, payload) => sent.map_err(CallError::transport_io),
        }
    }

    async fn pass_fds(&self, fds: &[RawFd]) -> Result<()> {
        let mut guard = self.lock_writer().await?;
        let Some(writer) = guard.as_mut() else {
            return Err(CallError::Closed(self.close_reason()));
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CallError::Closed(self.close_reason())),
            sent = transport::pass_fds(writer, fds) => sent.map_err(CallError::transport_io),
        }
    }

    fn close_reason(&self) -> CloseReason {
        self.shared
            .lock()
            .closed
            .clone()
            .unwrap_or(CloseReason::Requested)
    }

    /// Tear down the channel
    ///
    /// A pending call resolves with [`CallError::Closed`]; later calls fail
    /// the same way, and a write blocked on a full channel is abandoned.
    /// Calling this more than once is harmless.
    pub async fn close(&self) {
        let task = self.reader_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        {
            let mut shared = self.shared.lock();
            let reason = shared
                .closed
                .get_or_insert(CloseReason::Requested)
                .clone();
            if shared.correlator.fail(CallError::Closed(reason)) {
                tracing::debug!("Closed client with a call pending");
            }
        }
        self.shutdown.cancel();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "Failed to shut down host channel");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("next_id", &self.next_id())
            .field("framing", &self.encoder.framing())
            .finish()
    }
}

/// A call whose request has been written
///
/// Resolves exactly once, with the result or the error for this call.
/// Dropping it does not free the client for another call; the slot stays
/// taken until the host answers.
#[must_use = "the call's outcome is only observed by awaiting it"]
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(CallError::Closed(CloseReason::Dropped))))
    }
}

async fn write_flush(writer: &mut BoxedWriter, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Background task that drives the receive side
async fn read_loop(mut frames: FramedRead<BoxedReader, ResponseCodec>, shared: Arc<Mutex<Shared>>) {
    let (reason, err) = loop {
        match frames.next().await {
            Some(Ok(frame)) => dispatch_frame(&shared, frame),
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to read from host channel");
                break (CloseReason::Transport(e.to_string()), CallError::Transport(e));
            }
            None => {
                tracing::info!("Host closed channel");
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "host closed the channel");
                break (CloseReason::EndOfStream, CallError::transport_io(eof));
            }
        }
    };

    let mut shared = shared.lock();
    if !shared.correlator.fail(err) {
        tracing::warn!(reason = %reason, "Host channel ended with no call pending");
    }
    shared.closed.get_or_insert(reason);
}

fn dispatch_frame(shared: &Mutex<Shared>, frame: Frame) {
    tracing::trace!(bytes = frame.len(), "Received frame");

    match frame.parse() {
        Ok(response) => {
            let id = response.id;
            let verdict = shared.lock().correlator.on_response(response);
            match verdict {
                Some(verdict) => tracing::trace!(id, ?verdict, "Correlated response"),
                None => tracing::debug!(id, "Discarding response with no call pending"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse response frame");
            shared.lock().correlator.fail(CallError::Parse(e));
        }
    }
}
