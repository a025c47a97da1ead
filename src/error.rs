//! Error types for the kernel channel.
//!
//! Three kinds of failure move through this crate:
//!
//! - **Op errors**: errno values returned by the user filesystem. These ride
//!   on the reply header as plain `i32` values and never appear here.
//! - **Protocol errors**: frames that cannot be decoded or replies that would
//!   violate the negotiated limits. Logged; the offending op is answered EIO
//!   when one was identified.
//! - **Fatal errors**: device I/O failure or a refused handshake. These tear
//!   down the connection and surface as [`Error`].

use std::io;

/// A fatal connection error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device read or write failed (EINTR is retried internally and never
    /// surfaces here).
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),

    /// The kernel sent a frame the codec cannot make sense of in a way that
    /// leaves the stream unusable (e.g. a truncated read).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The kernel speaks a protocol version below the library minimum.
    #[error("unsupported kernel protocol {major}.{minor}")]
    Handshake { major: u32, minor: u32 },
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Errno-carrying result for filesystem operations.
pub type OpResult<T> = Result<T, i32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::from_raw_os_error(libc::ENODEV).into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_display() {
        let err = Error::Handshake { major: 6, minor: 8 };
        assert_eq!(err.to_string(), "unsupported kernel protocol 6.8");
    }
}
