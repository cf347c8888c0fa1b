//! # Batonio
//!
//! **Batonio** turns a callback-driven TCP socket into one whose
//! operations are plain futures. The socket layer underneath reports
//! progress through observer callbacks on a single-threaded event loop;
//! each awaited operation registers an observer, suspends until the
//! first of success, failure, timeout or cancellation arrives, and then
//! removes every trace of itself from the socket.
//!
//! The crate ships:
//!
//! - a single-threaded **event loop** (epoll on Linux, kqueue on macOS)
//!   with timers, deferred callbacks and local tasks,
//! - the callback socket handle [`net::AsyncSocket`],
//! - the awaitable [`Socket`] with `connect`, `read`, `read_buf`,
//!   `write` and `write_queue`,
//! - **cooperative cancellation** through [`cancel`] tokens,
//! - a growable [`BufQueue`] built on [`bytes`],
//! - **macros** `#[batonio::main]`, `#[batonio::test]` and `join!`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batonio::{EventLoop, Socket};
//! use std::time::Duration;
//!
//! #[batonio::main]
//! async fn main() {
//!     let event_loop = EventLoop::current().unwrap();
//!     let addr = "127.0.0.1:7000".parse().unwrap();
//!
//!     let socket = Socket::connect(&event_loop, addr, Duration::from_secs(1))
//!         .await
//!         .unwrap();
//!
//!     socket.write(b"ping", Duration::ZERO).await.unwrap();
//!
//!     let mut buf = [0u8; 4];
//!     let n = socket.read(&mut buf, Duration::from_secs(1)).await.unwrap();
//!     println!("{:?}", &buf[..n]);
//! }
//! ```
//!
//! ## Cancellation
//!
//! ```rust,ignore
//! use batonio::cancel::{CancellationSource, with_cancellation};
//!
//! let source = CancellationSource::new();
//! let read = with_cancellation(source.token(), socket.read(&mut buf, Duration::ZERO));
//! // Later, from anywhere on the loop thread:
//! source.request_cancellation();
//! ```
//!
//! ## Modules
//!
//! - [`socket`] — the awaitable socket and its error type
//! - [`net`] — the callback socket handle and its observer traits
//! - [`cancel`] — cancellation sources, tokens and scopes
//! - [`sync`] — the completion signal operations suspend on
//! - [`buf`] — the growable byte-buffer queue
//! - [`time`] — sleep and timeout

mod reactor;
mod utils;

pub mod buf;
pub mod cancel;
pub mod net;
pub mod socket;
pub mod sync;
pub mod time;

pub use buf::BufQueue;
pub use reactor::{EventLoop, EventLoopBuilder, TimerHandle};
pub use socket::{Error, Result, Socket};

pub use batonio_macros::*;
