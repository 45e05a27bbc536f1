//! Error types

use std::io;
use std::net::IpAddr;

use thiserror::Error;

use crate::id::ConnId;

/// Result type for sockplex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the registry, the reactor and handler callbacks.
///
/// Handlers return these from their callbacks; the reactor answers any
/// `Err` by scheduling that connection for shutdown.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport is detached or its descriptor is closed
    #[error("invalid transport handle")]
    InvalidHandle,

    /// Connection already carries a registry id
    #[error("connection {0} is already enqueued")]
    DuplicateId(ConnId),

    /// Registry table has no free slot
    #[error("connection table full ({0} slots)")]
    TableFull(usize),

    /// Append past a buffer's capacity limit
    #[error("buffer overflow: {needed} bytes needed, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    /// Write attempted on a connection already scheduled for shutdown
    #[error("connection closed")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Peer refused by a port's allow/deny lists
    #[error("access denied for {0}")]
    Denied(IpAddr),

    /// Peer connected more often than its port allows
    #[error("connect frequency exceeded for {0}")]
    RateLimited(IpAddr),

    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True for conditions that clear up on their own (retry later).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => is_transient_io(e),
            _ => false,
        }
    }
}

/// Classify an I/O error as transient.
///
/// Covers would-block, interruption and the kernel running short of
/// buffers or descriptors.
pub fn is_transient_io(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
        _ => matches!(
            err.raw_os_error(),
            Some(libc::ENOBUFS) | Some(libc::EMFILE) | Some(libc::ENFILE)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let wb = Error::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(wb.is_transient());
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient_io(&io::Error::from_raw_os_error(libc::ENOBUFS)));
        assert!(is_transient_io(&io::Error::from_raw_os_error(libc::EMFILE)));

        let reset = Error::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!reset.is_transient());
        assert!(!Error::Closed.is_transient());
    }

    #[test]
    fn test_error_display() {
        let e = Error::BufferOverflow {
            needed: 10,
            available: 4,
        };
        assert_eq!(e.to_string(), "buffer overflow: 10 bytes needed, 4 available");
        assert_eq!(
            Error::DuplicateId(ConnId::new(3, 1)).to_string(),
            "connection 3.1 is already enqueued"
        );
        assert_eq!(Error::protocol("bad id").to_string(), "protocol violation: bad id");
        let peer: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(Error::Denied(peer).to_string(), "access denied for 192.0.2.7");
    }
}
