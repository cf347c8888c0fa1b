//! Time utilities built on the event loop timer service.
//!
//! - [`sleep`] completes after a duration,
//! - [`timeout`] bounds how long a future may take.

mod sleep;
mod timeout;

#[doc(inline)]
pub use sleep::{Sleep, sleep};

#[doc(inline)]
pub use timeout::{Elapsed, Timeout, timeout};
