use super::CompletionSignal;
use crate::cancel::CancellationToken;

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, trace};

/// The wait ended because cancellation was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cancelled;

/// Completion state shared by every socket operation.
///
/// `finish` signals at most once, whatever mix of notifications,
/// timeouts and cancellations reaches the operation.
#[derive(Default)]
pub(crate) struct Completion {
    signal: CompletionSignal,
    done: Cell<bool>,
}

impl Completion {
    /// Signals the waiter. Returns `false` if already finished.
    pub(crate) fn finish(&self) -> bool {
        if self.done.replace(true) {
            debug!("redundant completion ignored");
            return false;
        }

        self.signal.signal();
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.get()
    }

    pub(crate) fn signal(&self) -> &CompletionSignal {
        &self.signal
    }
}

/// An in-flight operation that can be stopped early.
pub(crate) trait Abortable {
    fn completion(&self) -> &Completion;

    /// Stops the underlying work. Must be idempotent.
    fn abort(&self);

    /// Aborts, then releases the waiter.
    fn cancel(&self) {
        self.abort();
        self.completion().finish();
    }
}

/// Waits for `op` to complete, unless `token` is cancelled first.
///
/// Cancellation requested before the wait, while waiting, or in the same
/// loop iteration as the natural completion, yields `Err(Cancelled)`.
pub(crate) async fn wait_with_cancellation<O>(
    op: &Rc<O>,
    token: &CancellationToken,
) -> Result<(), Cancelled>
where
    O: Abortable + 'static,
{
    if token.is_cancellation_requested() {
        op.cancel();
        return Err(Cancelled);
    }

    let weak = Rc::downgrade(op);
    let _observer = token.on_cancel(move || {
        trace!("cancellation was called");
        if let Some(op) = weak.upgrade() {
            op.cancel();
        }
    });

    op.completion().signal().wait().await;
    trace!("after completion wait");

    if token.is_cancellation_requested() {
        op.cancel();
        return Err(Cancelled);
    }

    Ok(())
}
