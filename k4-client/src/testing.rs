//! In-memory host channel for tests
//!
//! The reader side delivers exactly the chunks (and errors) the test feeds
//! it, one chunk per read, so frame boundaries can be split at will. The
//! writer side records everything the client writes.

use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::client::{Client, ClientState};
use crate::config::ClientConfig;
use crate::context::HostContext;
use crate::transport::HostWriter;

type Chunk = io::Result<Vec<u8>>;

pub(crate) struct ScriptedReader {
    rx: mpsc::UnboundedReceiver<Chunk>,
    leftover: Vec<u8>,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.leftover.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.leftover = chunk,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // End of stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = buf.remaining().min(self.leftover.len());
        buf.put_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Poll::Ready(Ok(()))
    }
}

/// Descriptors passed by the client, with how many bytes had been written
/// before them
pub(crate) type PassedFds = Vec<(usize, Vec<RawFd>)>;

pub(crate) struct RecordingWriter {
    written: Arc<Mutex<Vec<u8>>>,
    passed: Arc<Mutex<PassedFds>>,
    fail: Arc<AtomicBool>,
    refuse_fds: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        // Never woken: a stalled write only ends by being dropped
        if self.stall.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")));
        }
        self.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl HostWriter for RecordingWriter {
    fn poll_send_fds(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        fds: &[RawFd],
    ) -> Poll<io::Result<()>> {
        if self.fail.load(Ordering::SeqCst) || self.refuse_fds.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")));
        }
        let offset = self.written.lock().len();
        self.passed.lock().push((offset, fds.to_vec()));
        Poll::Ready(Ok(()))
    }
}

/// The host's end of an in-memory channel
pub(crate) struct ScriptedPeer {
    tx: Mutex<Option<mpsc::UnboundedSender<Chunk>>>,
    written: Arc<Mutex<Vec<u8>>>,
    passed: Arc<Mutex<PassedFds>>,
    fail: Arc<AtomicBool>,
    refuse_fds: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
}

impl ScriptedPeer {
    /// Deliver one chunk to the client
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        let bytes = bytes.as_ref();
        assert!(!bytes.is_empty(), "empty chunks read as end of stream");
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Ok(bytes.to_vec()));
        }
    }

    /// Make the client's next read fail
    pub fn fail(&self, kind: io::ErrorKind) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Err(io::Error::new(kind, "scripted failure")));
        }
    }

    /// Close the host's end; the client reads end of stream
    pub fn hang_up(&self) {
        self.tx.lock().take();
    }

    /// Make the client's writes fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make only descriptor messages fail
    pub fn refuse_fds(&self, refuse: bool) {
        self.refuse_fds.store(refuse, Ordering::SeqCst);
    }

    /// Make the client's writes hang until they are dropped
    pub fn stall_writes(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Descriptor messages the client has sent so far
    pub fn passed_fds(&self) -> PassedFds {
        self.passed.lock().clone()
    }

    /// Everything the client has written so far
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.lock())
    }
}

pub(crate) fn channel() -> (ScriptedReader, RecordingWriter, ScriptedPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let passed = Arc::new(Mutex::new(Vec::new()));
    let fail = Arc::new(AtomicBool::new(false));
    let refuse_fds = Arc::new(AtomicBool::new(false));
    let stall = Arc::new(AtomicBool::new(false));

    let reader = ScriptedReader {
        rx,
        leftover: Vec::new(),
    };
    let writer = RecordingWriter {
        written: Arc::clone(&written),
        passed: Arc::clone(&passed),
        fail: Arc::clone(&fail),
        refuse_fds: Arc::clone(&refuse_fds),
        stall: Arc::clone(&stall),
    };
    let peer = ScriptedPeer {
        tx: Mutex::new(Some(tx)),
        written,
        passed,
        fail,
        refuse_fds,
        stall,
    };
    (reader, writer, peer)
}

pub(crate) fn client_with_context(
    config: ClientConfig,
    context: HostContext,
) -> (Client, ScriptedPeer) {
    let (reader, writer, peer) = channel();
    (Client::from_parts(reader, writer, context, &config), peer)
}

pub(crate) fn client_with_peer(config: ClientConfig) -> (Client, ScriptedPeer) {
    client_with_context(config, HostContext::default())
}

/// Wait until call `id` has been accepted
pub(crate) async fn wait_until_pending(client: &Client, id: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.state() != ClientState::Awaiting(id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("call never became pending");
}

/// Blocking receive of one descriptor message, the way the host reads it:
/// a single payload byte plus the attached `SCM_RIGHTS`
pub(crate) fn recv_fds(socket: RawFd) -> io::Result<(u8, Vec<OwnedFd>)> {
    let mut byte = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: byte.as_mut_ptr().cast(),
        iov_len: byte.len(),
    };

    let space = unsafe { libc::CMSG_SPACE((16 * std::mem::size_of::<RawFd>()) as u32) } as usize;
    let mut control = vec![0u64; space.div_ceil(8)];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let n = unsafe { libc::recvmsg(socket, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }

    let mut fds = Vec::new();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..len / std::mem::size_of::<RawFd>() {
                    fds.push(OwnedFd::from_raw_fd(*data.add(i)));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    Ok((byte[0], fds))
}
