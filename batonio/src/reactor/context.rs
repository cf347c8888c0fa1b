use super::EventLoop;

use std::cell::RefCell;

thread_local! {
    /// Thread-local handle to the event loop currently driving this thread.
    ///
    /// This is set while [`EventLoop::block_on`] runs and allows
    /// components (timers, sockets, macros) to reach the loop
    /// without explicit parameter passing.
    pub(crate) static CURRENT_LOOP: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Runs `f` with `event_loop` installed as the current loop.
///
/// The previous loop (if any) is restored afterwards, so nested
/// `block_on` calls on different loops behave.
pub(crate) fn enter_context<R>(event_loop: EventLoop, f: impl FnOnce() -> R) -> R {
    let prev = CURRENT_LOOP.with(|cell| cell.replace(Some(event_loop)));

    struct Restore(Option<EventLoop>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT_LOOP.with(|cell| cell.replace(prev));
        }
    }

    let _restore = Restore(prev);
    f()
}

/// Returns the loop installed by [`enter_context`], if any.
pub(crate) fn current() -> Option<EventLoop> {
    CURRENT_LOOP.with(|cell| cell.borrow().clone())
}
