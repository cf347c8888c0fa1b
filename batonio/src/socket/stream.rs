use super::connect::ConnectOperation;
use super::error::{Error, Result};
use super::op::OpGuard;
use super::read::ReadOperation;
use super::write::WriteOperation;
use crate::buf::BufQueue;
use crate::cancel::current_token;
use crate::net::{AsyncSocket, ConnectCallback, ReadCallback, WriteCallback};
use crate::reactor::EventLoop;
use crate::sync::{Cancelled, wait_with_cancellation};

use bytes::Bytes;
use std::cell::Cell;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

/// A TCP connection whose operations are futures.
///
/// Each operation installs itself on the underlying [`AsyncSocket`],
/// suspends until the socket reports the outcome and then removes
/// itself again. Operations observe the [current
/// cancellation token](crate::cancel::current_token): cancelling it wakes
/// the operation, which then fails with [`Error::Cancelled`].
///
/// A `Duration::ZERO` timeout means no timeout is enforced.
///
/// At most one read and one write may be in flight at a time. Issuing a
/// second read (or write) while one is pending is a caller error.
pub struct Socket {
    socket: AsyncSocket,
    /// The previous read returned data and also hit end of stream.
    deferred_read_eof: Cell<bool>,
}

impl Socket {
    /// Wraps a socket handle.
    pub fn new(socket: AsyncSocket) -> Self {
        Self {
            socket,
            deferred_read_eof: Cell::new(false),
        }
    }

    /// Connects to `addr`.
    ///
    /// A non-zero `timeout` is enforced by the socket itself; when it
    /// expires the call fails with [`Error::ConnectFailed`].
    pub async fn connect(event_loop: &EventLoop, addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = AsyncSocket::new(event_loop);
        socket.set_read_cb(None);

        let op = Rc::new(ConnectOperation::new(&socket));
        let _guard = OpGuard::new(&op);

        let observer: Rc<dyn ConnectCallback> = op.clone();
        socket.connect(observer, addr, timeout);

        let token = current_token();
        wait_with_cancellation(&op, &token)
            .await
            .map_err(|Cancelled| Error::Cancelled { bytes_written: 0 })?;

        if let Some(error) = op.take_error() {
            return Err(Error::ConnectFailed(error));
        }

        Ok(Self::new(socket))
    }

    /// Reads until `buf` is full, the stream ends or the socket fails.
    ///
    /// Returns the number of bytes read; `0` means end of stream. If the
    /// timeout expires before any byte arrived the call fails with
    /// [`Error::ReadTimedOut`]; if some bytes arrived, they are returned.
    ///
    /// Incoming bytes land in storage owned by the pending read, which
    /// grows in 64 KiB steps as data arrives, and are copied into `buf`
    /// once the read completes. Use [`read_buf`](Self::read_buf) to skip
    /// that copy.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.deferred_read_eof.replace(false) {
            trace!("deferred end of stream");
            return Ok(0);
        }

        if buf.is_empty() {
            return Ok(0);
        }

        trace!(len = buf.len(), "read, expecting max len");

        let op = ReadOperation::fixed(&self.socket, buf.len(), timeout);
        let _guard = OpGuard::new(&op);

        let observer: Rc<dyn ReadCallback> = op.clone();
        self.socket.set_read_cb(Some(observer));

        let token = current_token();
        let waited = wait_with_cancellation(&op, &token).await;

        self.finish_read(&op, waited)?;
        Ok(op.copy_into(buf))
    }

    /// Reads whatever arrives first and appends it to `queue`.
    ///
    /// The data lands in a region of at least `min_read` bytes,
    /// allocated `alloc` bytes at a time. Unlike [`read`](Self::read) the
    /// call never waits for more than the first batch of data.
    pub async fn read_buf(
        &self,
        queue: &mut BufQueue,
        min_read: usize,
        alloc: usize,
        timeout: Duration,
    ) -> Result<usize> {
        if self.deferred_read_eof.replace(false) {
            trace!("deferred end of stream");
            return Ok(0);
        }

        trace!(min_read, alloc, "read_buf");

        let op = ReadOperation::queue(&self.socket, mem::take(queue), min_read, alloc, timeout);
        let _loan = QueueLoan {
            queue,
            op: op.clone(),
        };
        let _guard = OpGuard::new(&op);

        let observer: Rc<dyn ReadCallback> = op.clone();
        self.socket.set_read_cb(Some(observer));

        let token = current_token();
        let waited = wait_with_cancellation(&op, &token).await;

        self.finish_read(&op, waited)
    }

    fn finish_read(&self, op: &ReadOperation, waited: std::result::Result<(), Cancelled>) -> Result<usize> {
        waited.map_err(|Cancelled| Error::Cancelled { bytes_written: 0 })?;

        if let Some(error) = op.take_error() {
            return Err(Error::ReadFailed(error));
        }

        if op.timed_out() {
            return Err(Error::ReadTimedOut);
        }

        self.socket.set_read_cb(None);

        let length = op.length();
        self.deferred_read_eof.set(op.eof() && length > 0);

        Ok(length)
    }

    /// Writes all of `buf`.
    ///
    /// On failure the error carries the number of bytes sent before it.
    /// Cancelling a write resets the connection.
    pub async fn write(&self, buf: &[u8], timeout: Duration) -> Result<()> {
        self.write_chunks(vec![Bytes::copy_from_slice(buf)], buf.len(), timeout)
            .await
    }

    /// Writes `data` without copying it.
    pub async fn write_bytes(&self, data: Bytes, timeout: Duration) -> Result<()> {
        let total = data.len();
        self.write_chunks(vec![data], total, timeout).await
    }

    /// Writes the contents of `queue` with one vectored write.
    ///
    /// The queue is left untouched.
    pub async fn write_queue(&self, queue: &mut BufQueue, timeout: Duration) -> Result<()> {
        let total = queue.len();
        self.write_chunks(queue.to_chunks(), total, timeout).await
    }

    async fn write_chunks(&self, chunks: Vec<Bytes>, total: usize, timeout: Duration) -> Result<()> {
        self.socket.set_send_timeout(timeout);

        let op = Rc::new(WriteOperation::new(&self.socket, total));
        let _guard = OpGuard::new(&op);

        let observer: Rc<dyn WriteCallback> = op.clone();
        self.socket.writev(observer, chunks);

        let token = current_token();
        let waited = wait_with_cancellation(&op, &token).await;

        let bytes_written = op.bytes_written();

        if waited.is_err() {
            return Err(Error::Cancelled { bytes_written });
        }

        if let Some(source) = op.take_error() {
            return Err(Error::WriteFailed {
                bytes_written,
                source,
            });
        }

        Ok(())
    }

    pub fn event_loop(&self) -> &EventLoop {
        self.socket.event_loop()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Shuts down the write side once pending data is flushed.
    pub fn shutdown_write(&self) {
        self.socket.shutdown_write();
    }

    pub fn close(&self) {
        self.socket.close();
    }

    /// Closes the connection, sending a RST to the peer.
    pub fn close_with_reset(&self) {
        self.socket.close_with_reset();
    }

    /// The underlying socket handle.
    pub fn async_socket(&self) -> &AsyncSocket {
        &self.socket
    }
}

impl From<AsyncSocket> for Socket {
    fn from(socket: AsyncSocket) -> Self {
        Self::new(socket)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("socket", &self.socket)
            .field("deferred_read_eof", &self.deferred_read_eof.get())
            .finish()
    }
}

/// Returns the caller's queue once the read is over, however it ends.
struct QueueLoan<'a> {
    queue: &'a mut BufQueue,
    op: Rc<ReadOperation>,
}

impl Drop for QueueLoan<'_> {
    fn drop(&mut self) {
        *self.queue = self.op.take_queue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancellationSource, with_cancellation};

    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn pair(event_loop: &EventLoop) -> (Socket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let socket = AsyncSocket::from_std(event_loop, client).unwrap();
        (Socket::new(socket), server)
    }

    #[test]
    fn test_data_with_eof_defers_the_eof() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, mut peer) = pair(&event_loop);

        peer.write_all(b"abc").unwrap();
        drop(peer);

        event_loop.block_on(async {
            let mut buf = [0u8; 10];

            assert_eq!(socket.read(&mut buf, Duration::ZERO).await.unwrap(), 3);
            assert_eq!(&buf[..3], b"abc");

            assert_eq!(socket.read(&mut buf, Duration::ZERO).await.unwrap(), 0);
            assert!(!socket.async_socket().has_read_callback());

            assert_eq!(socket.read(&mut buf, Duration::ZERO).await.unwrap(), 0);
            assert!(!socket.async_socket().has_read_callback());
        });
    }

    #[test]
    fn test_large_read_fills_the_whole_buffer() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, mut peer) = pair(&event_loop);

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let sent = payload.clone();
        let writer = std::thread::spawn(move || peer.write_all(&sent).unwrap());

        let mut buf = vec![0u8; payload.len()];
        let n = event_loop
            .block_on(socket.read(&mut buf, Duration::from_secs(5)))
            .unwrap();
        writer.join().unwrap();

        assert_eq!(n, payload.len());
        assert_eq!(buf, payload);
        assert!(!socket.async_socket().has_read_callback());
    }

    #[test]
    fn test_read_buf_returns_first_batch() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, mut peer) = pair(&event_loop);
        peer.write_all(b"abc").unwrap();

        let mut queue = BufQueue::from(&b">"[..]);
        let n = event_loop
            .block_on(socket.read_buf(&mut queue, 1000, 4000, Duration::ZERO))
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(&queue.to_bytes()[..], b">abc");
        assert!(!socket.async_socket().has_read_callback());
    }

    #[test]
    fn test_read_times_out_without_data() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, _peer) = pair(&event_loop);

        let mut buf = [0u8; 4];
        let result = event_loop.block_on(socket.read(&mut buf, Duration::from_millis(10)));

        assert!(matches!(result, Err(Error::ReadTimedOut)));
        assert!(!socket.async_socket().has_read_callback());
    }

    #[test]
    fn test_cancelled_read_uninstalls_observer() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, _peer) = pair(&event_loop);
        let source = Rc::new(CancellationSource::new());

        {
            let source = source.clone();
            event_loop.schedule_timeout(Duration::from_millis(5), move || {
                source.request_cancellation();
            });
        }

        let mut buf = [0u8; 4];
        let result = event_loop.block_on(with_cancellation(
            source.token(),
            socket.read(&mut buf, Duration::ZERO),
        ));

        assert!(matches!(result, Err(Error::Cancelled { bytes_written: 0 })));
        assert!(!socket.async_socket().has_read_callback());
    }

    #[test]
    fn test_dropped_read_restores_queue() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, _peer) = pair(&event_loop);
        let mut queue = BufQueue::from(&b"kept"[..]);

        event_loop.block_on(async {
            let read = socket.read_buf(&mut queue, 1, 16, Duration::ZERO);
            let outcome = crate::time::timeout(Duration::from_millis(5), read).await;
            assert!(outcome.is_err());
        });

        assert_eq!(&queue.to_bytes()[..], b"kept");
        assert!(!socket.async_socket().has_read_callback());
    }

    #[test]
    fn test_write_on_closed_socket_fails_without_progress() {
        let event_loop = EventLoop::new().unwrap();
        let (socket, _peer) = pair(&event_loop);
        socket.close();

        let result = event_loop.block_on(socket.write(b"late", Duration::ZERO));

        match result {
            Err(Error::WriteFailed { bytes_written, .. }) => assert_eq!(bytes_written, 0),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
