use super::EventLoop;

use std::io;

/// Tunables of an [`EventLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Config {
    /// Maximum number of readiness events collected per poll.
    pub(crate) max_events: usize,

    /// Maximum number of reads a socket performs per readiness event.
    pub(crate) max_reads_per_event: usize,

    /// Initial number of I/O registration slots.
    pub(crate) io_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_events: 64,
            max_reads_per_event: 16,
            io_capacity: 64,
        }
    }
}

/// Builder for configuring and creating an event loop.
///
/// `EventLoopBuilder` allows customizing loop parameters before
/// constructing it.
///
/// # Examples
///
/// ```rust,ignore
/// let event_loop = EventLoopBuilder::new()
///     .max_events(128)
///     .max_reads_per_event(4)
///     .build()?;
/// ```
pub struct EventLoopBuilder {
    config: Config,
}

impl EventLoopBuilder {
    /// Creates a new `EventLoopBuilder` with default configuration.
    ///
    /// Defaults: 64 events per poll, 16 reads per readiness event and
    /// room for 64 registered sockets before the registry grows.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Sets how many readiness events a single poll may return.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_events(mut self, n: usize) -> Self {
        assert!(n > 0, "max_events must be > 0");

        self.config.max_events = n;
        self
    }

    /// Sets how many consecutive reads a socket performs for one
    /// readiness event before yielding back to the loop.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_reads_per_event(mut self, n: usize) -> Self {
        assert!(n > 0, "max_reads_per_event must be > 0");

        self.config.max_reads_per_event = n;
        self
    }

    /// Sets the initial capacity of the socket registry.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn io_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "io_capacity must be > 0");

        self.config.io_capacity = n;
        self
    }

    /// Builds the event loop with the configured options.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS poller cannot be created.
    pub fn build(self) -> io::Result<EventLoop> {
        EventLoop::with_config(self.config)
    }
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
