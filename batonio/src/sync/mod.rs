//! Synchronization between event loop callbacks and suspended callers.
//!
//! Socket operations are completed by callbacks running on the event
//! loop, while the caller is suspended in a future on the same thread.
//! The primitives here bridge the two:
//! - [`CompletionSignal`]: single-slot, single-waiter wake-up,
//! - cancellable waiting, which lets a cancellation request wake the
//!   same suspension point a natural completion would.
//!
//! Everything is single-threaded; no locks are involved.

mod signal;
mod wait;

pub use signal::{CompletionSignal, Wait};

pub(crate) use wait::{Abortable, Cancelled, Completion, wait_with_cancellation};
