use crate::net::SocketError;

use thiserror::Error;

/// Failure of a [`Socket`](crate::Socket) operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection attempt failed or timed out.
    #[error("connect failed")]
    ConnectFailed(#[source] SocketError),

    /// The socket reported an error while reading.
    #[error("read failed")]
    ReadFailed(#[source] SocketError),

    /// No data arrived before the read timeout expired.
    #[error("timed out waiting for data")]
    ReadTimedOut,

    /// The write failed after `bytes_written` bytes were sent.
    #[error("write failed after {bytes_written} bytes")]
    WriteFailed {
        bytes_written: usize,
        #[source]
        source: SocketError,
    },

    /// The operation was cancelled. For writes, `bytes_written` counts
    /// the bytes sent before the connection was reset; otherwise it is 0.
    #[error("operation cancelled")]
    Cancelled { bytes_written: usize },
}

impl Error {
    /// Bytes a failed or cancelled write managed to send.
    pub fn bytes_written(&self) -> usize {
        match self {
            Error::WriteFailed { bytes_written, .. } | Error::Cancelled { bytes_written } => {
                *bytes_written
            }
            _ => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// The socket error behind this failure, if any.
    pub fn socket_error(&self) -> Option<&SocketError> {
        match self {
            Error::ConnectFailed(e) | Error::ReadFailed(e) => Some(e),
            Error::WriteFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
