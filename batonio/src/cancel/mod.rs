//! Cooperative cancellation.
//!
//! A [`CancellationSource`] hands out [`CancellationToken`]s. Requesting
//! cancellation flips every token and runs the observers registered with
//! [`CancellationToken::on_cancel`]. Cancellation never unwinds anything
//! by itself; operations watching a token decide how to stop.
//!
//! Socket operations pick up the *current* token, installed for the
//! duration of a future with [`with_cancellation`].

mod scope;

pub use scope::{WithCancellation, current_token, with_cancellation};

use crate::utils::Slab;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

struct CancelState {
    cancelled: Cell<bool>,
    observers: RefCell<Slab<Box<dyn FnOnce()>>>,
}

/// The owning side of a cancellation scope.
pub struct CancellationSource {
    state: Rc<CancelState>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            state: Rc::new(CancelState {
                cancelled: Cell::new(false),
                observers: RefCell::new(Slab::new(4)),
            }),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Some(self.state.clone()),
        }
    }

    /// Requests cancellation and runs the registered observers.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn request_cancellation(&self) -> bool {
        if self.state.cancelled.replace(true) {
            return false;
        }

        let observers = self.state.observers.borrow_mut().drain();
        trace!(observers = observers.len(), "cancellation requested");

        for observer in observers {
            observer();
        }

        true
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.cancelled.get()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.state.cancelled.get())
            .finish()
    }
}

/// The observing side of a cancellation scope. Cheap to clone.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Option<Rc<CancelState>>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self { state: None }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.cancelled.get())
    }

    /// Returns `false` for tokens that can never be cancelled.
    pub fn can_be_cancelled(&self) -> bool {
        self.state.is_some()
    }

    /// Registers `observer` to run when cancellation is requested.
    ///
    /// If cancellation was already requested, `observer` runs before this
    /// returns. Dropping the returned guard unregisters the observer.
    pub fn on_cancel(&self, observer: impl FnOnce() + 'static) -> CancellationCallback {
        let Some(state) = &self.state else {
            return CancellationCallback::inert();
        };

        if state.cancelled.get() {
            observer();
            return CancellationCallback::inert();
        }

        let id = state.observers.borrow_mut().insert(Box::new(observer));

        CancellationCallback {
            state: Rc::downgrade(state),
            id,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("cancelled", &self.is_cancellation_requested())
            .finish()
    }
}

/// Registration of a cancellation observer; unregisters on drop.
#[must_use = "dropping the callback unregisters the observer"]
pub struct CancellationCallback {
    state: Weak<CancelState>,
    id: usize,
}

impl CancellationCallback {
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            id: 0,
        }
    }
}

impl Drop for CancellationCallback {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };

        // Observers already ran (and were removed) once cancelled.
        if !state.cancelled.get() {
            drop(state.observers.borrow_mut().remove(self.id));
        }
    }
}
