use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// A single-use wake-up between one notifier and one waiter.
///
/// [`signal`](Self::signal) releases the waiter of [`wait`](Self::wait).
/// Signalling twice is a logic error of the caller; operations guard
/// against it before calling.
#[derive(Default)]
pub struct CompletionSignal {
    signaled: Cell<bool>,
    waiter: RefCell<Option<Waker>>,
    #[cfg(test)]
    posts: Cell<usize>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal as set and wakes the waiter, if any.
    pub fn signal(&self) {
        debug_assert!(!self.signaled.get(), "completion signalled twice");

        #[cfg(test)]
        self.posts.set(self.posts.get() + 1);

        self.signaled.set(true);

        if let Some(waker) = self.waiter.take() {
            waker.wake();
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.get()
    }

    /// Waits until [`signal`](Self::signal) has been called.
    pub fn wait(&self) -> Wait<'_> {
        Wait { signal: self }
    }

    #[cfg(test)]
    pub(crate) fn posts(&self) -> usize {
        self.posts.get()
    }
}

/// Future returned by [`CompletionSignal::wait`].
pub struct Wait<'a> {
    signal: &'a CompletionSignal,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.signaled.get() {
            return Poll::Ready(());
        }

        let mut waiter = self.signal.waiter.borrow_mut();
        match waiter.as_ref() {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => *waiter = Some(cx.waker().clone()),
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wait_resolves_after_signal() {
        let signal = CompletionSignal::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);

        let mut wait = std::pin::pin!(signal.wait());
        assert!(wait.as_mut().poll(&mut cx).is_pending());
        assert!(wait.as_mut().poll(&mut cx).is_pending());

        signal.signal();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(wait.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn test_signal_before_wait_does_not_suspend() {
        let signal = CompletionSignal::new();
        signal.signal();

        let mut cx = Context::from_waker(Waker::noop());
        assert!(std::pin::pin!(signal.wait()).poll(&mut cx).is_ready());
        assert_eq!(signal.posts(), 1);
    }

    #[test]
    #[should_panic(expected = "completion signalled twice")]
    #[cfg(debug_assertions)]
    fn test_double_signal_is_caught() {
        let signal = CompletionSignal::new();
        signal.signal();
        signal.signal();
    }
}
