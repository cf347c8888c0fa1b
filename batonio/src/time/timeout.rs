use crate::time::sleep::{Sleep, sleep};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;

/// Error returned by [`timeout`] when the deadline passes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("deadline has elapsed")]
pub struct Elapsed;

/// Requires `future` to complete within `duration`.
///
/// When the deadline passes first the wrapped future is dropped, which
/// runs whatever cleanup it performs on drop.
///
/// # Examples
///
/// ```rust,ignore
/// match timeout(Duration::from_millis(50), socket.read(&mut buf, Duration::ZERO)).await {
///     Ok(result) => { /* read finished */ }
///     Err(Elapsed) => { /* gave up */ }
/// }
/// ```
pub fn timeout<F>(duration: Duration, future: F) -> Timeout<F>
where
    F: Future,
{
    Timeout::new(duration, future)
}

/// Future returned by [`timeout`].
pub struct Timeout<F> {
    future: F,
    sleep: Sleep,
}

impl<F> Timeout<F> {
    pub(crate) fn new(duration: Duration, future: F) -> Self {
        Timeout {
            future,
            sleep: sleep(duration),
        }
    }
}

impl<F> Future for Timeout<F>
where
    F: Future,
{
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `future` is never moved out of `self`.
        let this = unsafe { self.get_unchecked_mut() };

        let future = unsafe { Pin::new_unchecked(&mut this.future) };
        if let Poll::Ready(val) = future.poll(cx) {
            return Poll::Ready(Ok(val));
        }

        let sleep = unsafe { Pin::new_unchecked(&mut this.sleep) };
        if let Poll::Ready(()) = sleep.poll(cx) {
            return Poll::Ready(Err(Elapsed));
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoop;

    #[test]
    fn test_ready_future_wins() {
        let event_loop = EventLoop::new().unwrap();

        let result = event_loop.block_on(timeout(Duration::from_secs(5), async { 7 }));

        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_slow_future_elapses() {
        let event_loop = EventLoop::new().unwrap();

        let result = event_loop.block_on(timeout(
            Duration::from_millis(5),
            sleep(Duration::from_secs(60)),
        ));

        assert_eq!(result, Err(Elapsed));
        assert_eq!(Elapsed.to_string(), "deadline has elapsed");
    }
}
