use super::{ConnectCallback, ReadCallback, SocketError, SocketErrorKind, WriteCallback};
use crate::reactor::poller::platform::{
    MAX_IOV, sys_close, sys_connect, sys_get_socket_error, sys_peername, sys_read,
    sys_set_linger_zero, sys_set_nosigpipe, sys_shutdown, sys_socket, sys_sockname, sys_writev,
};
use crate::reactor::{Event, EventLoop, Interest, IoHandler, TimerHandle};

use bytes::{Buf, Bytes};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, IoSlice};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{IntoRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace, warn};

/// Lifecycle of an [`AsyncSocket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Unconnected,
    Connecting,
    Established,
    Closed,
    Error,
}

/// The write currently being flushed.
struct PendingWrite {
    callback: Rc<dyn WriteCallback>,
    chunks: VecDeque<Bytes>,
    written: usize,
}

impl PendingWrite {
    fn advance(&mut self, mut n: usize) {
        self.written += n;

        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            if n >= front.len() {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }
}

struct SocketInner {
    event_loop: EventLoop,

    fd: Cell<Option<RawFd>>,
    token: Cell<Option<usize>>,
    state: Cell<SocketState>,

    /// End of stream was observed; the read side never re-arms.
    read_shut: Cell<bool>,
    /// `shutdown_write` was requested.
    write_shut: Cell<bool>,

    connect_cb: RefCell<Option<Rc<dyn ConnectCallback>>>,
    connect_timer: RefCell<Option<TimerHandle>>,

    read_cb: RefCell<Option<Rc<dyn ReadCallback>>>,

    pending_write: RefCell<Option<PendingWrite>>,
    send_timeout: Cell<Duration>,
    send_timer: RefCell<Option<TimerHandle>>,
}

/// A non-blocking TCP socket bound to an [`EventLoop`], reporting
/// completions through observer callbacks.
///
/// `AsyncSocket` is a reference-counted handle: clones refer to the same
/// connection. At most one read observer and one outstanding write exist
/// at any time. All methods must be called on the loop thread, and all
/// observers are invoked there.
///
/// The descriptor is closed when the last handle is dropped; observers are
/// not notified in that case.
#[derive(Clone)]
pub struct AsyncSocket {
    inner: Rc<SocketInner>,
}

/// Non-owning reference to an [`AsyncSocket`].
#[derive(Clone)]
pub struct WeakAsyncSocket {
    inner: Weak<SocketInner>,
}

impl WeakAsyncSocket {
    pub fn upgrade(&self) -> Option<AsyncSocket> {
        self.inner.upgrade().map(|inner| AsyncSocket { inner })
    }
}

impl IoHandler for SocketInner {
    fn on_ready(self: Rc<Self>, event: Event) {
        AsyncSocket { inner: self }.handle_event(event);
    }
}

impl AsyncSocket {
    /// Creates an unconnected socket on `event_loop`.
    pub fn new(event_loop: &EventLoop) -> Self {
        Self {
            inner: Rc::new(SocketInner {
                event_loop: event_loop.clone(),
                fd: Cell::new(None),
                token: Cell::new(None),
                state: Cell::new(SocketState::Unconnected),
                read_shut: Cell::new(false),
                write_shut: Cell::new(false),
                connect_cb: RefCell::new(None),
                connect_timer: RefCell::new(None),
                read_cb: RefCell::new(None),
                pending_write: RefCell::new(None),
                send_timeout: Cell::new(Duration::ZERO),
                send_timer: RefCell::new(None),
            }),
        }
    }

    /// Wraps an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be switched to non-blocking
    /// mode.
    pub fn from_std(event_loop: &EventLoop, stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let fd = stream.into_raw_fd();

        if let Err(e) = sys_set_nosigpipe(fd) {
            sys_close(fd);
            return Err(e);
        }

        let socket = Self::new(event_loop);
        socket.attach(fd);
        socket.inner.state.set(SocketState::Established);

        debug!(fd, "wrapped established socket");
        Ok(socket)
    }

    fn attach(&self, fd: RawFd) {
        let handler = Rc::downgrade(&self.inner);
        let handler: Weak<dyn IoHandler> = handler;
        let token = self.inner.event_loop.register_io(fd, handler);

        self.inner.fd.set(Some(fd));
        self.inner.token.set(Some(token));
    }

    pub fn downgrade(&self) -> WeakAsyncSocket {
        WeakAsyncSocket {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn state(&self) -> SocketState {
        self.inner.state.get()
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: SocketState) {
        self.inner.state.set(state);
    }

    /// Returns `true` while a read observer is installed.
    pub fn has_read_callback(&self) -> bool {
        self.inner.read_cb.borrow().is_some()
    }

    /// Returns `true` while a write is being flushed.
    pub fn has_pending_write(&self) -> bool {
        self.inner.pending_write.borrow().is_some()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.open_fd()?)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.open_fd()?)
    }

    fn open_fd(&self) -> io::Result<RawFd> {
        self.inner
            .fd
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not open"))
    }

    /// Starts connecting to `addr`.
    ///
    /// `callback` is told about the outcome. A non-zero `timeout` bounds
    /// the attempt; its expiry fails the connect with
    /// [`SocketErrorKind::TimedOut`].
    pub fn connect(&self, callback: Rc<dyn ConnectCallback>, addr: SocketAddr, timeout: Duration) {
        if self.state() != SocketState::Unconnected {
            callback.connect_err(SocketError::new(
                SocketErrorKind::AlreadyOpen,
                "connect() called on a socket that is already open",
            ));
            return;
        }

        let fd = match sys_socket(&addr) {
            Ok(fd) => fd,
            Err(e) => {
                self.inner.state.set(SocketState::Error);
                callback.connect_err(SocketError::from_io(
                    SocketErrorKind::NetworkError,
                    "failed to create socket",
                    &e,
                ));
                return;
            }
        };

        self.attach(fd);
        self.inner.state.set(SocketState::Connecting);
        debug!(fd, %addr, ?timeout, "connecting");

        match sys_connect(fd, &addr) {
            Ok(()) => {
                self.inner.state.set(SocketState::Established);
                self.update_interest();

                debug!(fd, %addr, "connected immediately");
                callback.connect_success();
            }

            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                *self.inner.connect_cb.borrow_mut() = Some(callback);

                if !timeout.is_zero() {
                    let weak = self.downgrade();
                    let timer = self.inner.event_loop.schedule_timeout(timeout, move || {
                        let Some(socket) = weak.upgrade() else { return };

                        if socket.state() == SocketState::Connecting {
                            socket.fail(SocketError::new(
                                SocketErrorKind::TimedOut,
                                format!("connect timed out after {}ms", timeout.as_millis()),
                            ));
                        }
                    });

                    *self.inner.connect_timer.borrow_mut() = Some(timer);
                }

                self.update_interest();
            }

            Err(e) => {
                *self.inner.connect_cb.borrow_mut() = Some(callback);
                self.fail(SocketError::from_io(
                    SocketErrorKind::NetworkError,
                    "connect failed",
                    &e,
                ));
            }
        }
    }

    /// Aborts an in-flight connect. The connect observer is not notified.
    pub fn cancel_connect(&self) {
        let dropped = self.inner.connect_cb.take();

        if matches!(
            self.state(),
            SocketState::Unconnected | SocketState::Connecting
        ) {
            debug!(had_observer = dropped.is_some(), "connect cancelled");
            self.teardown(None, false);
        }
    }

    fn finish_connect(&self) {
        let Some(fd) = self.inner.fd.get() else {
            return;
        };

        if let Err(e) = sys_get_socket_error(fd) {
            self.fail(SocketError::from_io(
                SocketErrorKind::NetworkError,
                "connect failed",
                &e,
            ));
            return;
        }

        self.inner.state.set(SocketState::Established);

        if let Some(timer) = self.inner.connect_timer.take() {
            timer.cancel();
        }

        let callback = self.inner.connect_cb.take();
        self.update_interest();

        debug!(fd, "connected");

        if let Some(callback) = callback {
            callback.connect_success();
        }
    }

    /// Installs or, with `None`, uninstalls the read observer.
    ///
    /// Uninstalling is always safe, also when nothing is installed. An
    /// observer installed after end of stream receives `read_eof` on the
    /// next loop iteration; one installed on a closed socket receives a
    /// [`SocketErrorKind::NotOpen`] error instead.
    pub fn set_read_cb(&self, callback: Option<Rc<dyn ReadCallback>>) {
        let Some(callback) = callback else {
            if self.inner.read_cb.take().is_some() {
                trace!("read observer uninstalled");
                self.update_interest();
            }
            return;
        };

        *self.inner.read_cb.borrow_mut() = Some(callback.clone());

        match self.state() {
            SocketState::Unconnected | SocketState::Connecting => {}

            SocketState::Established if !self.inner.read_shut.get() => {
                self.update_interest();
            }

            SocketState::Established | SocketState::Closed | SocketState::Error => {
                self.notify_late_reader(&callback);
            }
        }
    }

    /// Tells a reader installed after the read side shut down, unless it
    /// is uninstalled first.
    fn notify_late_reader(&self, callback: &Rc<dyn ReadCallback>) {
        let weak = self.downgrade();
        let reader = Rc::downgrade(callback);

        self.inner.event_loop.run_in_loop(move || {
            let (Some(socket), Some(reader)) = (weak.upgrade(), reader.upgrade()) else {
                return;
            };

            let installed = socket
                .inner
                .read_cb
                .borrow()
                .as_ref()
                .is_some_and(|current| Rc::ptr_eq(current, &reader));

            if !installed {
                return;
            }

            socket.inner.read_cb.take();

            if socket.state() == SocketState::Established {
                trace!("read_eof for late reader");
                reader.read_eof();
            } else {
                reader.read_err(SocketError::new(
                    SocketErrorKind::NotOpen,
                    "read observer installed on a closed socket",
                ));
            }
        });
    }

    /// Sets the send timeout. A write making no progress for this long
    /// fails the socket. `Duration::ZERO` disables it.
    pub fn set_send_timeout(&self, timeout: Duration) {
        self.inner.send_timeout.set(timeout);
    }

    pub fn send_timeout(&self) -> Duration {
        self.inner.send_timeout.get()
    }

    /// Writes `buffer`. See [`writev`](Self::writev).
    pub fn write(&self, callback: Rc<dyn WriteCallback>, buffer: Bytes) {
        self.writev(callback, vec![buffer]);
    }

    /// Writes `buffers` in order, as a single operation.
    ///
    /// Only one write may be outstanding; a second one fails immediately.
    /// Writes issued while connecting are flushed once connected.
    pub fn writev(&self, callback: Rc<dyn WriteCallback>, buffers: Vec<Bytes>) {
        let state = self.state();

        if !matches!(state, SocketState::Connecting | SocketState::Established)
            || self.inner.write_shut.get()
        {
            trace!(?state, "write on a socket that is not open");
            callback.write_err(
                0,
                SocketError::new(SocketErrorKind::NotOpen, "write on a socket that is not open"),
            );
            return;
        }

        if self.has_pending_write() {
            callback.write_err(
                0,
                SocketError::new(SocketErrorKind::Internal, "a write is already in progress"),
            );
            return;
        }

        let chunks: VecDeque<Bytes> = buffers.into_iter().filter(|b| !b.is_empty()).collect();
        if chunks.is_empty() {
            callback.write_success();
            return;
        }

        *self.inner.pending_write.borrow_mut() = Some(PendingWrite {
            callback,
            chunks,
            written: 0,
        });

        if state == SocketState::Established {
            self.handle_write();
        }
    }

    /// Closes the socket.
    ///
    /// A pending write fails with [`SocketErrorKind::NotOpen`], an
    /// installed read observer receives `read_eof` and a pending connect
    /// observer receives `connect_err`.
    pub fn close(&self) {
        self.teardown(None, false);
    }

    /// Closes the socket, sending a RST to the peer.
    pub fn close_with_reset(&self) {
        self.teardown(None, true);
    }

    /// Shuts down the write side once the outstanding write is flushed.
    pub fn shutdown_write(&self) {
        if self.state() != SocketState::Established || self.inner.write_shut.replace(true) {
            return;
        }

        if !self.has_pending_write() {
            self.shutdown_write_now();
        }
    }

    fn shutdown_write_now(&self) {
        let Some(fd) = self.inner.fd.get() else {
            return;
        };

        debug!(fd, "shutting down write side");

        if let Err(e) = sys_shutdown(fd, Shutdown::Write) {
            self.fail(SocketError::from_io(
                SocketErrorKind::NetworkError,
                "shutdown failed",
                &e,
            ));
        }
    }

    fn handle_event(&self, event: Event) {
        trace!(?event, state = ?self.state(), "socket ready");

        match self.state() {
            SocketState::Connecting if event.writable => self.finish_connect(),

            SocketState::Established => {
                if event.writable {
                    self.handle_write();
                }

                if event.readable && self.state() == SocketState::Established {
                    self.handle_read();
                }
            }

            _ => {}
        }
    }

    fn handle_read(&self) {
        let max_reads = self.inner.event_loop.max_reads_per_event();

        for _ in 0..max_reads {
            if self.state() != SocketState::Established || self.inner.read_shut.get() {
                return;
            }

            let (Some(fd), Some(callback)) =
                (self.inner.fd.get(), self.inner.read_cb.borrow().clone())
            else {
                return;
            };

            let empty_buffer = Cell::new(false);
            let result = callback.fill_read_buffer(&mut |buffer: &mut [u8]| {
                if buffer.is_empty() {
                    empty_buffer.set(true);
                    return Ok(0);
                }

                sys_read(fd, buffer)
            });

            match result {
                Ok(_) if empty_buffer.get() => {
                    self.fail(SocketError::new(
                        SocketErrorKind::BadArgs,
                        "read observer supplied an empty buffer",
                    ));
                    return;
                }

                Ok(0) => {
                    self.inner.read_shut.set(true);
                    let callback = self.inner.read_cb.take();
                    self.update_interest();

                    debug!(fd, "end of stream");

                    if let Some(callback) = callback {
                        callback.read_eof();
                    }
                    return;
                }

                Ok(n) => {
                    trace!(fd, bytes = n, "read_data_available");
                    callback.read_data_available(n);
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,

                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,

                Err(e) => {
                    self.fail(SocketError::from_io(
                        SocketErrorKind::NetworkError,
                        "read failed",
                        &e,
                    ));
                    return;
                }
            }
        }
    }

    fn handle_write(&self) {
        let Some(fd) = self.inner.fd.get() else {
            return;
        };

        loop {
            let result = {
                let pending = self.inner.pending_write.borrow();
                let Some(pending) = pending.as_ref() else {
                    return;
                };

                let slices: Vec<IoSlice<'_>> = pending
                    .chunks
                    .iter()
                    .take(MAX_IOV)
                    .map(|chunk| IoSlice::new(chunk))
                    .collect();

                sys_writev(fd, &slices)
            };

            match result {
                Ok(n) => {
                    let done = {
                        let mut pending = self.inner.pending_write.borrow_mut();
                        let Some(pending) = pending.as_mut() else {
                            return;
                        };

                        pending.advance(n);
                        pending.chunks.is_empty()
                    };

                    trace!(fd, bytes = n, done, "wrote");

                    if done {
                        self.complete_write();
                        return;
                    }
                }

                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.arm_send_timer();
                    self.update_interest();
                    return;
                }

                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,

                Err(e) => {
                    self.fail(SocketError::from_io(
                        SocketErrorKind::NetworkError,
                        "write failed",
                        &e,
                    ));
                    return;
                }
            }
        }
    }

    fn complete_write(&self) {
        if let Some(timer) = self.inner.send_timer.take() {
            timer.cancel();
        }

        let pending = self.inner.pending_write.take();
        self.update_interest();

        if self.inner.write_shut.get() {
            self.shutdown_write_now();
        }

        if let Some(pending) = pending {
            trace!(bytes = pending.written, "write_success");
            pending.callback.write_success();
        }
    }

    fn arm_send_timer(&self) {
        let timeout = self.inner.send_timeout.get();
        if timeout.is_zero() {
            return;
        }

        if let Some(timer) = self.inner.send_timer.take() {
            timer.cancel();
        }

        let weak = self.downgrade();
        let timer = self.inner.event_loop.schedule_timeout(timeout, move || {
            let Some(socket) = weak.upgrade() else { return };

            if socket.has_pending_write() {
                socket.fail(SocketError::new(
                    SocketErrorKind::TimedOut,
                    format!("write timed out after {}ms", timeout.as_millis()),
                ));
            }
        });

        *self.inner.send_timer.borrow_mut() = Some(timer);
    }

    fn update_interest(&self) {
        let Some(token) = self.inner.token.get() else {
            return;
        };

        let state = self.state();
        let interest = Interest {
            read: state == SocketState::Established
                && !self.inner.read_shut.get()
                && self.has_read_callback(),
            write: state == SocketState::Connecting
                || (state == SocketState::Established && self.has_pending_write()),
        };

        if let Err(e) = self.inner.event_loop.set_interest(token, interest) {
            self.fail(SocketError::from_io(
                SocketErrorKind::Internal,
                "failed to update event registration",
                &e,
            ));
        }
    }

    fn fail(&self, error: SocketError) {
        debug!(%error, "socket failed");
        self.teardown(Some(error), false);
    }

    /// Closes the descriptor and notifies every pending observer.
    fn teardown(&self, error: Option<SocketError>, reset: bool) {
        let inner = &self.inner;

        if matches!(inner.state.get(), SocketState::Closed | SocketState::Error) {
            return;
        }

        let failed = error.is_some();
        inner.state.set(if failed {
            SocketState::Error
        } else {
            SocketState::Closed
        });

        if let Some(token) = inner.token.take() {
            inner.event_loop.deregister_io(token);
        }

        if let Some(fd) = inner.fd.take() {
            if reset && let Err(e) = sys_set_linger_zero(fd) {
                warn!(fd, error = %e, "failed to request reset on close");
            }

            sys_close(fd);
            debug!(fd, reset, failed, "socket closed");
        }

        for timer in [inner.connect_timer.take(), inner.send_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }

        let connect_cb = inner.connect_cb.take();
        let pending = inner.pending_write.take();
        let read_cb = inner.read_cb.take();

        let error =
            error.unwrap_or_else(|| SocketError::new(SocketErrorKind::NotOpen, "socket closed"));

        if let Some(callback) = connect_cb {
            trace!(%error, "connect_err");
            callback.connect_err(error.clone());
        }

        if let Some(pending) = pending {
            trace!(%error, bytes = pending.written, "write_err");
            pending.callback.write_err(pending.written, error.clone());
        }

        if let Some(callback) = read_cb {
            if failed {
                trace!(%error, "read_err");
                callback.read_err(error);
            } else {
                trace!("read_eof on local close");
                callback.read_eof();
            }
        }
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.event_loop.deregister_io(token);
        }

        if let Some(fd) = self.fd.take() {
            sys_close(fd);
        }

        for timer in [self.connect_timer.take(), self.send_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }
    }
}

impl fmt::Debug for AsyncSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSocket")
            .field("fd", &self.inner.fd.get())
            .field("state", &self.inner.state.get())
            .field("read_shut", &self.inner.read_shut.get())
            .finish()
    }
}
