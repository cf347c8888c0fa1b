//! Event loop core and event handling.
//!
//! This module implements the single-threaded event loop every socket
//! is bound to. The loop is responsible for:
//! - driving I/O readiness through the OS poller,
//! - firing scheduled timeouts,
//! - running deferred callbacks and local tasks.
//!
//! Sockets register an [`IoHandler`] and receive readiness
//! notifications on the loop thread; futures are woken through the
//! ready queue, which also interrupts a blocking poll.

mod builder;
mod context;
mod core;
mod event;
mod task;
mod timer;

pub(crate) mod poller;

pub use builder::EventLoopBuilder;
pub use self::core::EventLoop;
pub use timer::TimerHandle;

pub(crate) use self::core::IoHandler;
pub(crate) use event::Event;
pub(crate) use poller::common::Interest;
