//! Readiness multiplexing.
//!
//! A recorder serving many event sources registers each source's
//! descriptor here and blocks until any of them (or its stop channel) has
//! data. The trait keeps the recorder logic testable without real
//! descriptors.

use std::io;
use std::os::fd::RawFd;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// Readiness of one registered descriptor after a wait.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: usize,
    pub readable: bool,
    /// Error or hangup condition on the descriptor.
    pub error: bool,
}

/// Block-until-ready over a set of registered descriptors.
pub trait Multiplexer: Send {
    /// Register a descriptor under a caller-chosen token.
    fn register(&mut self, token: usize, fd: RawFd) -> io::Result<()>;

    /// Block indefinitely until at least one descriptor is ready, filling
    /// `ready` with the outcome. Returns the number of ready descriptors.
    fn wait(&mut self, ready: &mut Vec<Readiness>) -> io::Result<usize>;
}

/// Production multiplexer over mio's `Poll` (epoll on Linux).
pub struct PollMultiplexer {
    poll: Poll,
    events: Events,
}

impl PollMultiplexer {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
        })
    }
}

impl Multiplexer for PollMultiplexer {
    fn register(&mut self, token: usize, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(token), Interest::READABLE)
    }

    fn wait(&mut self, ready: &mut Vec<Readiness>) -> io::Result<usize> {
        ready.clear();

        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for event in self.events.iter() {
            ready.push(Readiness {
                token: event.token().0,
                readable: event.is_readable(),
                error: event.is_error() || event.is_read_closed(),
            });
        }

        Ok(ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_channel;
    use std::os::fd::AsRawFd;

    #[test]
    fn wait_reports_readable_token() {
        let (tx, rx) = stop_channel().unwrap();
        let mut mux = PollMultiplexer::new().unwrap();
        mux.register(7, rx.as_raw_fd()).unwrap();

        // Signal before waiting so the wait returns immediately.
        tx.signal();

        let mut ready = Vec::new();
        let n = mux.wait(&mut ready).unwrap();
        assert_eq!(n, 1);
        assert_eq!(ready[0].token, 7);
        assert!(ready[0].readable);
        assert!(!ready[0].error);
    }
}
