//! Observer traits through which an [`AsyncSocket`](super::AsyncSocket)
//! reports completions.
//!
//! Every method runs on the event loop thread. An observer may call back
//! into the socket (for example to uninstall itself) from any of them.

use super::SocketError;

use std::io;

/// Observer of a connection attempt.
///
/// Exactly one of the two methods is invoked, unless the attempt is
/// aborted with [`cancel_connect`](super::AsyncSocket::cancel_connect).
pub trait ConnectCallback {
    fn connect_success(&self);

    fn connect_err(&self, error: SocketError);
}

/// Observer of the read side of a socket.
pub trait ReadCallback {
    /// Supplies the region the next read lands in.
    ///
    /// The observer calls `fill` exactly once with a non-empty buffer and
    /// returns its result. The number of bytes read is then reported via
    /// [`read_data_available`](Self::read_data_available).
    fn fill_read_buffer(
        &self,
        fill: &mut dyn FnMut(&mut [u8]) -> io::Result<usize>,
    ) -> io::Result<usize>;

    /// `len` bytes were stored into the region last handed to `fill`.
    fn read_data_available(&self, len: usize);

    /// The peer closed its write side, or the socket was closed locally.
    ///
    /// The observer has already been uninstalled when this runs.
    fn read_eof(&self);

    /// The socket failed. The observer has already been uninstalled.
    fn read_err(&self, error: SocketError);
}

/// Observer of one outstanding write.
pub trait WriteCallback {
    fn write_success(&self);

    /// The write failed after `bytes_written` bytes reached the kernel.
    fn write_err(&self, bytes_written: usize, error: SocketError);
}
