use crate::net::{AsyncSocket, SocketError, WeakAsyncSocket, WriteCallback};
use crate::sync::{Abortable, Completion};

use std::cell::{Cell, RefCell};

use tracing::{debug, trace};

/// Bridges one write to a waiting caller.
///
/// A write cannot be cancelled halfway through, so aborting it resets
/// the connection.
pub(crate) struct WriteOperation {
    socket: WeakAsyncSocket,
    completion: Completion,
    total: usize,
    bytes_written: Cell<usize>,
    error: RefCell<Option<SocketError>>,
}

impl WriteOperation {
    pub(crate) fn new(socket: &AsyncSocket, total: usize) -> Self {
        Self {
            socket: socket.downgrade(),
            completion: Completion::default(),
            total,
            bytes_written: Cell::new(0),
            error: RefCell::new(None),
        }
    }

    /// Bytes known to have been sent, never more than requested.
    pub(crate) fn bytes_written(&self) -> usize {
        self.bytes_written.get().min(self.total)
    }

    pub(crate) fn take_error(&self) -> Option<SocketError> {
        self.error.take()
    }
}

impl WriteCallback for WriteOperation {
    fn write_success(&self) {
        trace!(bytes = self.total, "write_success");

        if self.completion.is_done() {
            debug!("write success after completion ignored");
            return;
        }

        self.bytes_written.set(self.total);
        self.completion.finish();
    }

    fn write_err(&self, bytes_written: usize, error: SocketError) {
        trace!(bytes_written, %error, "write_err");

        if self.completion.is_done() {
            debug!(%error, "write error after completion ignored");
            return;
        }

        self.bytes_written.set(bytes_written);
        *self.error.borrow_mut() = Some(error);
        self.completion.finish();
    }
}

impl Abortable for WriteOperation {
    fn completion(&self) -> &Completion {
        &self.completion
    }

    fn abort(&self) {
        if let Some(socket) = self.socket.upgrade() {
            socket.close_with_reset();
        }
    }
}
