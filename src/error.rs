use std::io;

/// Errors surfaced by the recording engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Syscall-level failure; carries the OS error code.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A requested counter or tracepoint name the host does not know.
    #[error("'{0}' does not name a known event")]
    UnknownEvent(String),

    /// Malformed kernel-supplied data (tracepoint format, proc stat).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The readiness wait broke its contract (zero-ready return with no
    /// timeout, unexpected error or hangup flags).
    #[error("readiness protocol violation: {0}")]
    PollProtocol(&'static str),

    /// A recorder thread panicked before it could report a result.
    #[error("recorder thread panicked")]
    ThreadPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
