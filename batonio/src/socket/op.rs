use crate::sync::Abortable;

use std::rc::Rc;

use tracing::debug;

/// Aborts its operation if dropped before the operation completed.
///
/// This keeps a dropped caller from leaving an observer installed on
/// the socket or a timer armed.
pub(crate) struct OpGuard<O: Abortable> {
    op: Rc<O>,
}

impl<O: Abortable> OpGuard<O> {
    pub(crate) fn new(op: &Rc<O>) -> Self {
        Self { op: op.clone() }
    }
}

impl<O: Abortable> Drop for OpGuard<O> {
    fn drop(&mut self) {
        if !self.op.completion().is_done() {
            debug!("operation dropped while in flight");
            self.op.abort();
        }
    }
}
