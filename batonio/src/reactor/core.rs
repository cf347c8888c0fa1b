use super::builder::{Config, EventLoopBuilder};
use super::context;
use super::event::Event;
use super::poller::Poller;
use super::poller::common::Interest;
use super::task::{LocalTask, MAIN_TASK, ReadyQueue, make_waker};
use super::timer::{TimerEntry, TimerHandle, TimerState};
use crate::utils::Slab;

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::future::Future;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::pin::pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tracing::{error, trace};

/// Receiver of readiness notifications for one registered descriptor.
pub(crate) trait IoHandler {
    fn on_ready(self: Rc<Self>, event: Event);
}

/// A registered descriptor.
struct IoEntry {
    fd: RawFd,
    interest: Interest,
    handler: Weak<dyn IoHandler>,
}

struct Inner {
    poller: RefCell<Poller>,
    events: RefCell<Vec<Event>>,

    io: RefCell<Slab<IoEntry>>,

    timers: RefCell<BinaryHeap<TimerEntry>>,
    next_timer_seq: Cell<u64>,
    /// Cancelled entries not yet removed from `timers`.
    cancelled_timers: Rc<Cell<usize>>,

    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,

    tasks: RefCell<Slab<Option<LocalTask>>>,
    ready: Arc<ReadyQueue>,

    config: Config,
}

/// A single-threaded event loop.
///
/// The loop multiplexes socket readiness, timeouts and deferred
/// callbacks on the thread that drives it, and runs local futures via
/// [`block_on`](Self::block_on) and [`spawn`](Self::spawn).
///
/// `EventLoop` is a cheap handle: clones refer to the same loop. It is
/// neither `Send` nor `Sync`; every socket bound to a loop must be used
/// from the loop's thread.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    /// Creates an event loop with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS poller cannot be created.
    pub fn new() -> io::Result<Self> {
        EventLoopBuilder::new().build()
    }

    pub(crate) fn with_config(config: Config) -> io::Result<Self> {
        let poller = Poller::new(config.max_events)?;
        let ready = Arc::new(ReadyQueue::new(poller.waker()));

        Ok(Self {
            inner: Rc::new(Inner {
                poller: RefCell::new(poller),
                events: RefCell::new(Vec::with_capacity(config.max_events)),
                io: RefCell::new(Slab::new(config.io_capacity)),
                timers: RefCell::new(BinaryHeap::new()),
                next_timer_seq: Cell::new(0),
                cancelled_timers: Rc::new(Cell::new(0)),
                deferred: RefCell::new(VecDeque::new()),
                tasks: RefCell::new(Slab::new(16)),
                ready,
                config,
            }),
        })
    }

    /// Returns the loop currently running [`block_on`](Self::block_on) on
    /// this thread, if any.
    pub fn current() -> Option<EventLoop> {
        context::current()
    }

    /// Returns `true` if both handles refer to the same loop.
    pub fn ptr_eq(&self, other: &EventLoop) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn queued_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn registered_io(&self) -> usize {
        self.inner.io.borrow().len()
    }

    pub(crate) fn max_reads_per_event(&self) -> usize {
        self.inner.config.max_reads_per_event
    }

    /// Runs `callback` on the loop thread once `after` has elapsed.
    ///
    /// The returned handle can cancel the timeout; dropping it leaves
    /// the timeout armed.
    pub fn schedule_timeout(
        &self,
        after: Duration,
        callback: impl FnOnce() + 'static,
    ) -> TimerHandle {
        let state = Rc::new(Cell::new(TimerState::Pending));
        let seq = self.inner.next_timer_seq.get();
        self.inner.next_timer_seq.set(seq + 1);

        self.inner.timers.borrow_mut().push(TimerEntry {
            deadline: Instant::now() + after,
            seq,
            callback: Box::new(callback),
            state: state.clone(),
        });

        TimerHandle {
            state,
            cancelled: self.inner.cancelled_timers.clone(),
        }
    }

    /// Queues `callback` to run on the next loop iteration.
    ///
    /// Callbacks queued while deferred callbacks are running wait for
    /// the following iteration.
    pub fn run_in_loop(&self, callback: impl FnOnce() + 'static) {
        self.inner.deferred.borrow_mut().push_back(Box::new(callback));
    }

    /// Spawns a local future onto the loop.
    ///
    /// The future makes progress while the loop is driven by
    /// [`block_on`](Self::block_on).
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let id = self.inner.tasks.borrow_mut().insert(Some(Box::pin(future)));
        self.inner.ready.push(id);
    }

    /// Drives the loop until `future` completes and returns its output.
    ///
    /// While running, the loop is installed as the
    /// [current](Self::current) loop of this thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS poller fails.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        context::enter_context(self.clone(), || {
            let mut future = pin!(future);
            let waker = make_waker(MAIN_TASK, self.inner.ready.clone());
            let mut cx = Context::from_waker(&waker);

            self.inner.ready.push(MAIN_TASK);

            loop {
                for id in self.inner.ready.drain() {
                    if id == MAIN_TASK {
                        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                            return output;
                        }
                    } else {
                        self.poll_task(id);
                    }
                }

                let block = self.inner.ready.is_empty();
                if let Err(e) = self.turn(block) {
                    error!(error = %e, "event loop poll failed");
                    panic!("event loop poll failed: {e}");
                }
            }
        })
    }

    fn poll_task(&self, id: usize) {
        let task = match self.inner.tasks.borrow_mut().get_mut(id) {
            Some(slot) => slot.take(),
            None => return,
        };

        // Already being polled further up the stack, or stale id.
        let Some(mut task) = task else { return };

        let waker = make_waker(id, self.inner.ready.clone());
        let mut cx = Context::from_waker(&waker);

        match task.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.inner.tasks.borrow_mut().remove(id);
            }
            Poll::Pending => {
                if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(id) {
                    *slot = Some(task);
                }
            }
        }
    }

    /// Runs one loop iteration.
    ///
    /// Deferred callbacks run first, then the poller is queried (blocking
    /// until the next timer deadline when `block` is set and nothing else
    /// is runnable), readiness is dispatched and expired timers fire.
    pub(crate) fn turn(&self, block: bool) -> io::Result<()> {
        self.run_deferred();
        self.compact_timers();

        let timeout = if !block
            || !self.inner.deferred.borrow().is_empty()
            || !self.inner.ready.is_empty()
        {
            Some(Duration::ZERO)
        } else {
            self.next_timer_delay()
        };

        let mut events = mem::take(&mut *self.inner.events.borrow_mut());
        let polled = self.inner.poller.borrow_mut().poll(&mut events, timeout);

        if polled.is_ok() {
            for event in &events {
                self.dispatch(*event);
            }
        }

        events.clear();
        *self.inner.events.borrow_mut() = events;
        polled?;

        self.fire_timers();

        Ok(())
    }

    fn run_deferred(&self) {
        let batch: Vec<_> = self.inner.deferred.borrow_mut().drain(..).collect();

        for callback in batch {
            callback();
        }
    }

    /// Drops cancelled timers once they outnumber the armed ones.
    fn compact_timers(&self) {
        let cancelled = self.inner.cancelled_timers.get();
        if cancelled == 0 {
            return;
        }

        let mut timers = self.inner.timers.borrow_mut();
        if cancelled * 2 < timers.len() {
            return;
        }

        timers.retain(|timer| timer.state.get() == TimerState::Pending);
        self.inner.cancelled_timers.set(0);

        trace!(removed = cancelled, armed = timers.len(), "compacted timers");
    }

    /// Pops a cancelled entry off the queue, keeping the count in step.
    fn discard_cancelled(&self) {
        let cancelled = self.inner.cancelled_timers.get();
        self.inner.cancelled_timers.set(cancelled.saturating_sub(1));
    }

    fn next_timer_delay(&self) -> Option<Duration> {
        let mut timers = self.inner.timers.borrow_mut();

        while let Some(timer) = timers.peek() {
            if timer.state.get() == TimerState::Pending {
                return Some(timer.deadline.saturating_duration_since(Instant::now()));
            }

            timers.pop();
            self.discard_cancelled();
        }

        None
    }

    fn dispatch(&self, event: Event) {
        let handler = self
            .inner
            .io
            .borrow()
            .get(event.token)
            .and_then(|entry| entry.handler.upgrade());

        match handler {
            Some(handler) => handler.on_ready(event),
            None => trace!(token = event.token, "event for unregistered token"),
        }
    }

    fn fire_timers(&self) {
        let now = Instant::now();

        loop {
            let timer = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.peek() {
                    Some(t) if t.deadline <= now => timers.pop(),
                    _ => None,
                }
            };

            let Some(timer) = timer else { break };

            if timer.state.get() != TimerState::Pending {
                self.discard_cancelled();
                continue;
            }

            timer.state.set(TimerState::Fired);
            (timer.callback)();
        }
    }

    /// Adds `fd` to the registry without any interest yet.
    pub(crate) fn register_io(&self, fd: RawFd, handler: Weak<dyn IoHandler>) -> usize {
        self.inner.io.borrow_mut().insert(IoEntry {
            fd,
            interest: Interest::NONE,
            handler,
        })
    }

    /// Updates the readiness a registration is interested in.
    ///
    /// An empty interest removes the descriptor from the poller while
    /// keeping its token.
    pub(crate) fn set_interest(&self, token: usize, interest: Interest) -> io::Result<()> {
        let mut io = self.inner.io.borrow_mut();
        let Some(entry) = io.get_mut(token) else {
            return Ok(());
        };

        if entry.interest == interest {
            return Ok(());
        }

        let poller = self.inner.poller.borrow();
        match (entry.interest.is_empty(), interest.is_empty()) {
            (true, false) => poller.register(entry.fd, token, interest)?,
            (false, false) => poller.reregister(entry.fd, token, interest)?,
            (false, true) => poller.deregister(entry.fd),
            (true, true) => {}
        }

        entry.interest = interest;
        Ok(())
    }

    /// Removes a registration. Must be called before the fd is closed.
    pub(crate) fn deregister_io(&self, token: usize) {
        let entry = self.inner.io.borrow_mut().remove(token);

        if let Some(entry) = entry
            && !entry.interest.is_empty()
        {
            self.inner.poller.borrow().deregister(entry.fd);
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("registered", &self.inner.io.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_returns_output() {
        let event_loop = EventLoop::new().unwrap();
        assert_eq!(event_loop.block_on(async { 7 }), 7);
    }

    #[test]
    fn test_current_is_set_inside_block_on() {
        let event_loop = EventLoop::new().unwrap();
        assert!(EventLoop::current().is_none());

        let inside = event_loop.block_on(async { EventLoop::current() });
        assert!(inside.is_some_and(|l| l.ptr_eq(&event_loop)));
        assert!(EventLoop::current().is_none());
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let event_loop = EventLoop::new().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        for (delay, tag) in [(20, "late"), (5, "early"), (5, "early-2")] {
            let order = order.clone();
            event_loop.schedule_timeout(Duration::from_millis(delay), move || {
                order.borrow_mut().push(tag);
            });
        }

        while order.borrow().len() < 3 {
            event_loop.turn(true).unwrap();
        }

        assert_eq!(*order.borrow(), vec!["early", "early-2", "late"]);
    }

    #[test]
    fn test_cancelled_timer_never_runs() {
        let event_loop = EventLoop::new().unwrap();
        let fired = Rc::new(Cell::new(false));

        let handle = {
            let fired = fired.clone();
            event_loop.schedule_timeout(Duration::from_millis(1), move || fired.set(true))
        };
        assert!(handle.cancel());

        let done = Rc::new(Cell::new(false));
        {
            let done = done.clone();
            event_loop.schedule_timeout(Duration::from_millis(5), move || done.set(true));
        }

        while !done.get() {
            event_loop.turn(true).unwrap();
        }

        assert!(!fired.get());
        assert!(!handle.has_fired());
    }

    #[test]
    fn test_cancelled_timers_are_compacted() {
        let event_loop = EventLoop::new().unwrap();
        let keep = event_loop.schedule_timeout(Duration::from_secs(60), || {});

        for _ in 0..1000 {
            let handle = event_loop.schedule_timeout(Duration::from_secs(60), || {});
            handle.cancel();
        }
        assert_eq!(event_loop.queued_timers(), 1001);

        event_loop.turn(false).unwrap();

        assert_eq!(event_loop.queued_timers(), 1);
        assert!(keep.is_pending());
    }

    #[test]
    fn test_few_cancelled_timers_wait_for_compaction() {
        let event_loop = EventLoop::new().unwrap();
        let handles: Vec<_> = (0..10)
            .map(|_| event_loop.schedule_timeout(Duration::from_secs(60), || {}))
            .collect();

        handles[0].cancel();
        event_loop.turn(false).unwrap();
        assert_eq!(event_loop.queued_timers(), 10);

        for handle in &handles[1..5] {
            handle.cancel();
        }
        event_loop.turn(false).unwrap();
        assert_eq!(event_loop.queued_timers(), 5);
    }

    #[test]
    fn test_run_in_loop_defers_to_next_iteration() {
        let event_loop = EventLoop::new().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let log = log.clone();
            let again = event_loop.clone();
            event_loop.run_in_loop(move || {
                log.borrow_mut().push(1);
                let log = log.clone();
                again.run_in_loop(move || log.borrow_mut().push(2));
            });
        }

        event_loop.turn(false).unwrap();
        assert_eq!(*log.borrow(), vec![1]);

        event_loop.turn(false).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_spawned_tasks_run_to_completion() {
        let event_loop = EventLoop::new().unwrap();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            event_loop.spawn(async move {
                hits.set(hits.get() + 1);
            });
        }

        event_loop.block_on(async {
            while hits.get() < 3 {
                crate::time::sleep(Duration::from_millis(1)).await;
            }
        });

        assert_eq!(hits.get(), 3);
    }
}
