//! Byte transport for the host channel
//!
//! The host creates a socketpair before launching the script and passes one
//! end as an extra descriptor. The client never dials; it adopts that
//! descriptor once and owns it from then on.
//!
//! Besides bytes, the channel can carry descriptors: a request that hands
//! the host files (the supervisor's `Spawn`) is followed by a one-byte
//! message with the descriptors attached as `SCM_RIGHTS`.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, Interest, WriteHalf};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;

use k4_utils::{K4Error, Result};

/// Payload byte of the message carrying descriptors
pub const FD_MARKER: u8 = 1;

/// Read half accepted by the client
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half accepted by the client
pub type BoxedWriter = Box<dyn HostWriter>;

/// Write side of a host channel
///
/// Channels that are not Unix sockets keep the default, which refuses to
/// pass descriptors.
pub trait HostWriter: AsyncWrite + Send + Unpin {
    /// Send `fds` to the host in a single [`FD_MARKER`] message
    fn poll_send_fds(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        fds: &[RawFd],
    ) -> Poll<io::Result<()>> {
        let _ = (cx, fds);
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "channel cannot pass descriptors",
        )))
    }
}

impl<W: HostWriter + ?Sized> HostWriter for Box<W> {
    fn poll_send_fds(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        fds: &[RawFd],
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_send_fds(cx, fds)
    }
}

impl HostWriter for OwnedWriteHalf {
    fn poll_send_fds(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        fds: &[RawFd],
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let stream: &UnixStream = this.as_ref();
        loop {
            ready!(stream.poll_write_ready(cx))?;
            match stream.try_io(Interest::WRITABLE, || send_fds(stream.as_raw_fd(), fds)) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                other => return Poll::Ready(other),
            }
        }
    }
}

impl<S: AsyncWrite + Send> HostWriter for WriteHalf<S> {}

/// Pass `fds` over `writer`, after anything already written to it
pub async fn pass_fds<W: HostWriter + ?Sized>(writer: &mut W, fds: &[RawFd]) -> io::Result<()> {
    futures::future::poll_fn(|cx| Pin::new(&mut *writer).poll_send_fds(cx, fds)).await
}

/// Send one [`FD_MARKER`] byte with `fds` attached as `SCM_RIGHTS`
///
/// The descriptors stay open in this process; the host receives duplicates.
pub fn send_fds(socket: RawFd, fds: &[RawFd]) -> io::Result<()> {
    if fds.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no descriptors to pass",
        ));
    }

    let marker = [FD_MARKER];
    let mut iov = libc::iovec {
        iov_base: marker.as_ptr() as *mut libc::c_void,
        iov_len: marker.len(),
    };

    let data_len = std::mem::size_of_val(fds);
    // SAFETY: CMSG_SPACE only computes a size
    let space = unsafe { libc::CMSG_SPACE(data_len as u32) } as usize;
    // u64 words keep the control buffer aligned for cmsghdr
    let mut control = vec![0u64; space.div_ceil(8)];

    // SAFETY: an all-zero msghdr is valid before the pointers are set
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    // SAFETY: the control buffer is at least CMSG_SPACE(data_len) bytes and
    // outlives every pointer derived from it
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "control buffer too small for SCM_RIGHTS",
            ));
        }
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(data_len as u32) as _;
        std::ptr::copy_nonoverlapping(
            fds.as_ptr(),
            libc::CMSG_DATA(cmsg).cast::<RawFd>(),
            fds.len(),
        );
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    // SAFETY: msg points at live iov and control buffers
    let n = unsafe { libc::sendmsg(socket, &msg, flags) };
    match n {
        n if n < 0 => Err(io::Error::last_os_error()),
        0 => Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "sendmsg wrote nothing",
        )),
        _ => Ok(()),
    }
}

/// Check that `fd` refers to an open descriptor
pub fn check_fd(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD only queries descriptor flags
    let rc = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Take ownership of the inherited stream socket at `fd`
///
/// Must be called from within a tokio runtime. The descriptor is closed
/// when the returned stream is dropped, so call this at most once per
/// descriptor.
pub fn inherit(fd: RawFd) -> Result<UnixStream> {
    check_fd(fd).map_err(|source| K4Error::ChannelUnavailable { fd, source })?;

    // SAFETY: the descriptor is open and nothing else in this process owns
    // it; the host hands it to exactly one client.
    let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    std_stream
        .set_nonblocking(true)
        .map_err(|source| K4Error::ChannelUnavailable { fd, source })?;

    let stream = UnixStream::from_std(std_stream)
        .map_err(|source| K4Error::ChannelUnavailable { fd, source })?;

    tracing::debug!(fd, "Adopted inherited host channel");
    Ok(stream)
}

/// Split a stream into boxed halves for the client
pub fn split_boxed<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}
