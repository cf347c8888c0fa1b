/// An I/O event reported by the poller.
///
/// An `Event` represents readiness information for a registered
/// file descriptor. It is produced by the poller and consumed
/// by the event loop to notify the owning I/O handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// This token is the slab index of the handler inside the event loop.
    pub(crate) token: usize,

    /// The descriptor is readable, hung up, or in error.
    pub(crate) readable: bool,

    /// The descriptor is writable.
    pub(crate) writable: bool,
}
