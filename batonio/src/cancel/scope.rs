use super::CancellationToken;

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    /// Token of the innermost [`WithCancellation`] being polled.
    static CURRENT_TOKEN: RefCell<CancellationToken> = RefCell::new(CancellationToken::none());
}

/// Returns the token installed by the innermost enclosing
/// [`with_cancellation`], or [`CancellationToken::none`].
pub fn current_token() -> CancellationToken {
    CURRENT_TOKEN.with(|cell| cell.borrow().clone())
}

/// Makes `token` the current token while `future` is polled.
///
/// # Examples
///
/// ```rust,ignore
/// let source = CancellationSource::new();
/// let read = with_cancellation(source.token(), socket.read(&mut buf, Duration::ZERO));
/// ```
pub fn with_cancellation<F: Future>(token: CancellationToken, future: F) -> WithCancellation<F> {
    WithCancellation { token, future }
}

/// Future returned by [`with_cancellation`].
pub struct WithCancellation<F> {
    token: CancellationToken,
    future: F,
}

impl<F: Future> Future for WithCancellation<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };

        let previous = CURRENT_TOKEN.with(|cell| cell.replace(this.token.clone()));

        struct Restore(Option<CancellationToken>);

        impl Drop for Restore {
            fn drop(&mut self) {
                if let Some(previous) = self.0.take() {
                    CURRENT_TOKEN.with(|cell| cell.replace(previous));
                }
            }
        }

        let _restore = Restore(Some(previous));

        let future = unsafe { Pin::new_unchecked(&mut this.future) };
        future.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;

    fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
        let mut future = std::pin::pin!(future);
        future
            .as_mut()
            .poll(&mut Context::from_waker(std::task::Waker::noop()))
    }

    #[test]
    fn test_current_token_is_scoped() {
        let source = CancellationSource::new();
        source.request_cancellation();

        assert!(!current_token().can_be_cancelled());

        let seen = poll_once(with_cancellation(source.token(), async {
            current_token().is_cancellation_requested()
        }));

        assert_eq!(seen, Poll::Ready(true));
        assert!(!current_token().can_be_cancelled());
    }

    #[test]
    fn test_nested_scopes_restore_outer_token() {
        let outer = CancellationSource::new();
        let inner = CancellationSource::new();
        inner.request_cancellation();

        let result = poll_once(with_cancellation(outer.token(), async move {
            let nested = with_cancellation(inner.token(), async {
                current_token().is_cancellation_requested()
            })
            .await;

            (nested, current_token().is_cancellation_requested())
        }));

        assert_eq!(result, Poll::Ready((true, false)));
    }
}
