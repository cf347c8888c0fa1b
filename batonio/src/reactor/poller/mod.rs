//! Platform-specific I/O poller abstraction.
//!
//! This module provides a unified interface over platform-specific
//! I/O polling mechanisms (epoll on Linux, kqueue on macOS).
//!
//! The poller is used by the event loop to:
//! - wait for I/O readiness events,
//! - wake the loop when a task is woken from another thread,
//! - sleep until the next timer deadline.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::Waker;

use std::time::Duration;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

/// Converts a poll timeout into milliseconds, `-1` meaning "block".
///
/// Sub-millisecond remainders round up so a pending timer never turns
/// the loop into a busy spin.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let ms = t.as_nanos().div_ceil(1_000_000);
            ms.min(i32::MAX as u128) as i32
        }
    }
}
