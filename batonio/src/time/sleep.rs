use crate::reactor::{EventLoop, TimerHandle};

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Creates a future that completes after the given duration.
///
/// The timer is scheduled on the current event loop when the future is
/// first polled.
///
/// # Panics
///
/// Panics if polled outside of [`EventLoop::block_on`].
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// Timer state shared between the future and its loop callback.
#[derive(Default)]
struct Shared {
    fired: bool,
    waker: Option<Waker>,
}

/// A future that completes once its duration has elapsed.
///
/// Dropping it before completion cancels the timer.
pub struct Sleep {
    duration: Duration,
    shared: Rc<RefCell<Shared>>,
    timer: Option<TimerHandle>,
}

impl Sleep {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            shared: Rc::new(RefCell::new(Shared::default())),
            timer: None,
        }
    }

    fn register(&mut self) {
        let event_loop = EventLoop::current().expect("Sleep polled outside of an event loop");
        let shared = self.shared.clone();

        self.timer = Some(event_loop.schedule_timeout(self.duration, move || {
            let waker = {
                let mut shared = shared.borrow_mut();
                shared.fired = true;
                shared.waker.take()
            };

            if let Some(waker) = waker {
                waker.wake();
            }
        }));
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.timer.is_none() {
            this.register();
        }

        let mut shared = this.shared.borrow_mut();
        if shared.fired {
            return Poll::Ready(());
        }

        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_waits_for_duration() {
        let event_loop = EventLoop::new().unwrap();
        let start = Instant::now();

        event_loop.block_on(sleep(Duration::from_millis(20)));

        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_arms_timer_on_first_poll() {
        let event_loop = EventLoop::new().unwrap();

        event_loop.block_on(async {
            let mut pending = Box::pin(sleep(Duration::from_secs(60)));
            let waker = Waker::noop();
            let mut cx = Context::from_waker(waker);

            assert!(pending.as_mut().poll(&mut cx).is_pending());
            let timer = pending.timer.as_ref().map(TimerHandle::is_pending);
            assert_eq!(timer, Some(true));
        });
    }

    #[test]
    fn test_dropped_sleep_does_not_hold_the_loop() {
        let event_loop = EventLoop::new().unwrap();
        let start = Instant::now();

        event_loop.block_on(async {
            let outcome = crate::time::timeout(Duration::from_millis(1), sleep(Duration::from_secs(60))).await;
            assert_eq!(outcome, Err(crate::time::Elapsed));
        });

        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
