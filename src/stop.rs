//! Stop channel: a one-shot wake-up signal for indefinitely blocked polls.
//!
//! A recorder that blocks without timeout cannot rely on a checked flag to
//! shut down. Instead the read end of a pipe sits in its poll set; any
//! write to the other end wakes the poll immediately. Writing is
//! idempotent and safe under concurrent callers, so `stop()` may be called
//! from any thread, any number of times.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use tracing::warn;

/// Create a stop channel.
///
/// The receiver's descriptor is registered with the recorder's
/// multiplexer; the sender is kept by the owning handle and may be cloned
/// into other threads.
pub fn stop_channel() -> io::Result<(StopSender, StopReceiver)> {
    let mut fds = [0 as libc::c_int; 2];
    // Non-blocking on both ends: a signal must never block the caller,
    // and the polling thread drains without waiting.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    Ok((StopSender { fd: Arc::new(write) }, StopReceiver { fd: read }))
}

/// Write side of a stop channel.
#[derive(Clone)]
pub struct StopSender {
    fd: Arc<OwnedFd>,
}

impl StopSender {
    /// Request a stop.
    ///
    /// A full pipe means a wake-up is already pending, so EAGAIN counts as
    /// success.
    pub fn signal(&self) {
        let buf = [0u8; 1];
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!("stop signal write failed: {err}");
            }
        }
    }
}

/// Read side of a stop channel, owned by the polling thread.
pub struct StopReceiver {
    fd: OwnedFd,
}

impl AsRawFd for StopReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
