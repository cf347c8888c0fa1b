//! Socket-level errors.

use std::fmt;
use std::io;
use thiserror::Error;

/// Category of a [`SocketError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketErrorKind {
    /// The socket is closed or was never opened.
    NotOpen,
    /// The socket is already connecting or connected.
    AlreadyOpen,
    /// A connect or send timeout expired, or a read waited too long.
    TimedOut,
    /// The peer closed the stream.
    EndOfFile,
    /// Invariant violation inside the socket layer.
    Internal,
    /// A caller supplied unusable arguments.
    BadArgs,
    /// The operating system reported a failure.
    NetworkError,
}

impl fmt::Display for SocketErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketErrorKind::NotOpen => "socket not open",
            SocketErrorKind::AlreadyOpen => "socket already open",
            SocketErrorKind::TimedOut => "timed out",
            SocketErrorKind::EndOfFile => "end of file",
            SocketErrorKind::Internal => "internal error",
            SocketErrorKind::BadArgs => "bad arguments",
            SocketErrorKind::NetworkError => "network error",
        };

        f.write_str(name)
    }
}

/// Error reported by an [`AsyncSocket`](crate::net::AsyncSocket) to its
/// observers.
///
/// Socket errors are cheap to clone so that one failure can be handed to
/// every observer that was pending when it happened.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SocketError {
    kind: SocketErrorKind,
    message: String,
    os_error: Option<i32>,
}

impl SocketError {
    /// Creates an error without an OS error code.
    pub fn new(kind: SocketErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            os_error: None,
        }
    }

    /// Creates an error from an I/O failure, keeping its OS error code.
    pub fn from_io(kind: SocketErrorKind, context: &str, error: &io::Error) -> Self {
        Self {
            kind,
            message: format!("{context}: {error}"),
            os_error: error.raw_os_error(),
        }
    }

    pub fn kind(&self) -> SocketErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The OS error code (`errno`) behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.os_error
    }
}

impl From<SocketError> for io::Error {
    fn from(error: SocketError) -> Self {
        let kind = match (error.kind, error.os_error) {
            (_, Some(code)) => io::Error::from_raw_os_error(code).kind(),
            (SocketErrorKind::NotOpen, None) => io::ErrorKind::NotConnected,
            (SocketErrorKind::AlreadyOpen, None) => io::ErrorKind::AlreadyExists,
            (SocketErrorKind::TimedOut, None) => io::ErrorKind::TimedOut,
            (SocketErrorKind::EndOfFile, None) => io::ErrorKind::UnexpectedEof,
            (SocketErrorKind::BadArgs, None) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_keeps_os_code() {
        let io_err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        let err = SocketError::from_io(SocketErrorKind::NetworkError, "connect failed", &io_err);

        assert_eq!(err.kind(), SocketErrorKind::NetworkError);
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
        assert!(err.message().starts_with("connect failed: "));
        assert!(err.to_string().starts_with("network error: connect failed"));
    }

    #[test]
    fn test_into_io_error_kind() {
        let err: io::Error = SocketError::new(SocketErrorKind::TimedOut, "connect timed out").into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let io_err = io::Error::from_raw_os_error(libc::ECONNRESET);
        let err: io::Error =
            SocketError::from_io(SocketErrorKind::NetworkError, "write failed", &io_err).into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
