use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// Lifecycle of a scheduled timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerState {
    Pending,
    Fired,
    Cancelled,
}

/// An entry in the event loop timer queue.
///
/// `TimerEntry` represents a callback scheduled at a specific
/// deadline. It is stored inside a binary heap ordered by deadline,
/// with the insertion sequence breaking ties so that timers sharing a
/// deadline fire in scheduling order.
///
/// The entry may be cancelled before it fires.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Insertion order, used to break deadline ties.
    pub(crate) seq: u64,

    /// Callback run on the loop thread when the deadline is reached.
    pub(crate) callback: Box<dyn FnOnce()>,

    /// State shared with the [`TimerHandle`].
    pub(crate) state: Rc<Cell<TimerState>>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline, then sequence.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle to a timeout scheduled with
/// [`EventLoop::schedule_timeout`](crate::EventLoop::schedule_timeout).
///
/// Cancelling the handle guarantees the callback never runs. Dropping
/// the handle does **not** cancel the timer.
pub struct TimerHandle {
    pub(crate) state: Rc<Cell<TimerState>>,
    /// Cancelled entries still sitting in the loop's queue.
    pub(crate) cancelled: Rc<Cell<usize>>,
}

impl TimerHandle {
    /// Cancels the timer if it has not fired yet.
    ///
    /// Returns `true` if this call prevented the callback from running.
    pub fn cancel(&self) -> bool {
        if self.state.get() == TimerState::Pending {
            self.state.set(TimerState::Cancelled);
            self.cancelled.set(self.cancelled.get() + 1);
            return true;
        }

        false
    }

    /// Returns `true` while the timer is armed.
    pub fn is_pending(&self) -> bool {
        self.state.get() == TimerState::Pending
    }

    /// Returns `true` once the callback has run.
    pub fn has_fired(&self) -> bool {
        self.state.get() == TimerState::Fired
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::time::Duration;

    fn entry(deadline: Instant, seq: u64) -> TimerEntry {
        TimerEntry {
            deadline,
            seq,
            callback: Box::new(|| {}),
            state: Rc::new(Cell::new(TimerState::Pending)),
        }
    }

    #[test]
    fn test_heap_pops_earliest_deadline_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        heap.push(entry(now + Duration::from_millis(30), 0));
        heap.push(entry(now + Duration::from_millis(10), 1));
        heap.push(entry(now + Duration::from_millis(10), 2));
        heap.push(entry(now + Duration::from_millis(20), 3));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_handle_cancel_only_once() {
        let handle = TimerHandle {
            state: Rc::new(Cell::new(TimerState::Pending)),
            cancelled: Rc::new(Cell::new(0)),
        };

        assert!(handle.is_pending());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.cancelled.get(), 1);
        assert!(!handle.is_pending());
        assert!(!handle.has_fired());
    }
}
