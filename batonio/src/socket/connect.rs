use crate::net::{AsyncSocket, ConnectCallback, SocketError, WeakAsyncSocket};
use crate::sync::{Abortable, Completion};

use std::cell::RefCell;

use tracing::{debug, trace};

/// Bridges a connect attempt to a waiting caller.
pub(crate) struct ConnectOperation {
    socket: WeakAsyncSocket,
    completion: Completion,
    error: RefCell<Option<SocketError>>,
}

impl ConnectOperation {
    pub(crate) fn new(socket: &AsyncSocket) -> Self {
        Self {
            socket: socket.downgrade(),
            completion: Completion::default(),
            error: RefCell::new(None),
        }
    }

    pub(crate) fn take_error(&self) -> Option<SocketError> {
        self.error.take()
    }
}

impl ConnectCallback for ConnectOperation {
    fn connect_success(&self) {
        trace!("connect_success");
        self.completion.finish();
    }

    fn connect_err(&self, error: SocketError) {
        trace!(%error, "connect_err");

        if self.completion.is_done() {
            debug!(%error, "connect error after completion ignored");
            return;
        }

        *self.error.borrow_mut() = Some(error);
        self.completion.finish();
    }
}

impl Abortable for ConnectOperation {
    fn completion(&self) -> &Completion {
        &self.completion
    }

    fn abort(&self) {
        if let Some(socket) = self.socket.upgrade() {
            socket.cancel_connect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SocketErrorKind;
    use crate::reactor::EventLoop;

    #[test]
    fn test_error_after_success_is_ignored() {
        let event_loop = EventLoop::new().unwrap();
        let socket = AsyncSocket::new(&event_loop);
        let op = ConnectOperation::new(&socket);

        op.connect_success();
        op.connect_err(SocketError::new(SocketErrorKind::NetworkError, "late"));

        assert_eq!(op.completion.signal().posts(), 1);
        assert!(op.take_error().is_none());
    }

    #[test]
    fn test_failure_is_captured() {
        let event_loop = EventLoop::new().unwrap();
        let socket = AsyncSocket::new(&event_loop);
        let op = ConnectOperation::new(&socket);

        op.connect_err(SocketError::new(SocketErrorKind::TimedOut, "connect timed out"));
        op.connect_success();

        assert_eq!(op.completion.signal().posts(), 1);
        assert_eq!(op.take_error().map(|e| e.kind()), Some(SocketErrorKind::TimedOut));
    }

    #[test]
    fn test_abort_closes_unconnected_socket_silently() {
        let event_loop = EventLoop::new().unwrap();
        let socket = AsyncSocket::new(&event_loop);
        let op = std::rc::Rc::new(ConnectOperation::new(&socket));

        op.cancel();

        assert!(op.completion.is_done());
        assert!(op.take_error().is_none());
        assert_eq!(socket.state(), crate::net::SocketState::Closed);
    }
}
