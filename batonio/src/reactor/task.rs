use super::poller::Waker as PollerWaker;

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Wake, Waker};

/// Id reserved for the future driven by `block_on`.
pub(crate) const MAIN_TASK: usize = usize::MAX;

/// A spawned, not yet completed, local task.
pub(crate) type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// Ids of tasks that asked to be polled again.
///
/// Wakers may be invoked from any thread, so the queue is shared behind a
/// mutex and pushing into an empty queue interrupts a blocking poll.
pub(crate) struct ReadyQueue {
    ids: Mutex<VecDeque<usize>>,
    notifier: Arc<PollerWaker>,
}

impl ReadyQueue {
    pub(crate) fn new(notifier: Arc<PollerWaker>) -> Self {
        Self {
            ids: Mutex::new(VecDeque::new()),
            notifier,
        }
    }

    pub(crate) fn push(&self, id: usize) {
        let was_empty = {
            let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
            let was_empty = ids.is_empty();
            ids.push_back(id);
            was_empty
        };

        if was_empty {
            self.notifier.wake();
        }
    }

    /// Takes every queued id, dropping duplicates.
    pub(crate) fn drain(&self) -> Vec<usize> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = HashSet::with_capacity(ids.len());

        ids.drain(..).filter(|id| seen.insert(*id)).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Waker that reschedules one task on its event loop.
struct TaskWaker {
    id: usize,
    queue: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.id);
    }
}

/// Creates a [`Waker`] that marks task `id` ready on `queue`.
pub(crate) fn make_waker(id: usize, queue: Arc<ReadyQueue>) -> Waker {
    Waker::from(Arc::new(TaskWaker { id, queue }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::Poller;

    fn queue() -> (Poller, Arc<ReadyQueue>) {
        let poller = Poller::new(8).unwrap();
        let queue = Arc::new(ReadyQueue::new(poller.waker()));
        (poller, queue)
    }

    #[test]
    fn test_drain_keeps_first_wake_order_without_duplicates() {
        let (_poller, queue) = queue();

        for id in [3, 1, 3, 2, 1, 3] {
            queue.push(id);
        }

        assert_eq!(queue.drain(), vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_handles_many_distinct_wakes() {
        let (_poller, queue) = queue();

        for _ in 0..2 {
            for id in 0..10_000 {
                queue.push(id);
            }
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 10_000);
        assert_eq!(drained.first(), Some(&0));
        assert_eq!(drained.last(), Some(&9_999));
    }

    #[test]
    fn test_waker_pushes_its_task() {
        let (_poller, queue) = queue();
        let waker = make_waker(7, queue.clone());

        waker.wake_by_ref();
        waker.wake();

        assert_eq!(queue.drain(), vec![7]);
    }
}
