//! Callback-driven TCP sockets.
//!
//! [`AsyncSocket`] is the completion-callback socket handle the
//! coroutine [`Socket`](crate::Socket) is built on. It performs
//! non-blocking connect, read and write on the event loop thread and
//! reports outcomes to observers implementing [`ConnectCallback`],
//! [`ReadCallback`] and [`WriteCallback`].

mod callback;
mod error;
mod socket;

pub use callback::{ConnectCallback, ReadCallback, WriteCallback};
pub use error::{SocketError, SocketErrorKind};
pub use socket::{AsyncSocket, SocketState, WeakAsyncSocket};
