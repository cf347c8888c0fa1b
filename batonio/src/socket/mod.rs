//! Sockets whose operations are awaited instead of called back.
//!
//! Every operation on a [`Socket`] follows the same shape: an operation
//! object registers itself as the observer of an
//! [`AsyncSocket`](crate::net::AsyncSocket), the caller suspends on its
//! completion signal, and whichever notification arrives first completes
//! it exactly once.

mod connect;
mod error;
mod op;
mod read;
mod stream;
mod write;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use stream::Socket;
