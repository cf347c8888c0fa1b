use crate::buf::BufQueue;
use crate::net::{AsyncSocket, ReadCallback, SocketError, WeakAsyncSocket};
use crate::reactor::TimerHandle;
use crate::sync::{Abortable, Completion};

use std::cell::{Cell, RefCell};
use std::io;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

/// Largest region a fixed read hands to the socket at once.
const FIXED_READ_CHUNK: usize = 64 * 1024;

/// Where the bytes of a read land.
enum ReadTarget {
    /// Completes once `capacity` bytes arrived. `data` only grows as
    /// bytes arrive, never to the full capacity up front.
    Fixed {
        data: RefCell<Vec<u8>>,
        capacity: usize,
    },

    /// Completes after the first batch of data.
    Queue {
        queue: RefCell<BufQueue>,
        min_read: usize,
        alloc: usize,
    },
}

/// Bridges the read side of a socket to a waiting caller.
///
/// The operation is installed as the socket's read observer and,
/// optionally, arms a timeout. Whatever ends the read (data, end of
/// stream, error, timeout) first uninstalls the observer and disarms
/// the timer, then completes.
pub(crate) struct ReadOperation {
    socket: WeakAsyncSocket,
    completion: Completion,
    target: ReadTarget,

    /// Bytes delivered to this operation so far.
    length: Cell<usize>,
    eof: Cell<bool>,
    timed_out: Cell<bool>,
    error: RefCell<Option<SocketError>>,

    timer: RefCell<Option<TimerHandle>>,
}

impl ReadOperation {
    /// A read filling exactly `len` bytes, unless the stream ends first.
    pub(crate) fn fixed(socket: &AsyncSocket, len: usize, timeout: Duration) -> Rc<Self> {
        let target = ReadTarget::Fixed {
            data: RefCell::new(Vec::new()),
            capacity: len,
        };

        Self::start(socket, target, timeout)
    }

    /// A read appending the first available data to `queue`.
    pub(crate) fn queue(
        socket: &AsyncSocket,
        queue: BufQueue,
        min_read: usize,
        alloc: usize,
        timeout: Duration,
    ) -> Rc<Self> {
        let target = ReadTarget::Queue {
            queue: RefCell::new(queue),
            min_read,
            alloc,
        };

        Self::start(socket, target, timeout)
    }

    fn start(socket: &AsyncSocket, target: ReadTarget, timeout: Duration) -> Rc<Self> {
        let op = Rc::new(Self {
            socket: socket.downgrade(),
            completion: Completion::default(),
            target,
            length: Cell::new(0),
            eof: Cell::new(false),
            timed_out: Cell::new(false),
            error: RefCell::new(None),
            timer: RefCell::new(None),
        });

        if !timeout.is_zero() {
            let weak = Rc::downgrade(&op);
            let timer = socket.event_loop().schedule_timeout(timeout, move || {
                if let Some(op) = weak.upgrade() {
                    op.timeout_expired();
                }
            });

            *op.timer.borrow_mut() = Some(timer);
        }

        op
    }

    pub(crate) fn length(&self) -> usize {
        self.length.get()
    }

    pub(crate) fn eof(&self) -> bool {
        self.eof.get()
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.get()
    }

    pub(crate) fn take_error(&self) -> Option<SocketError> {
        self.error.take()
    }

    /// Copies the bytes read so far into `out`. Returns the count.
    pub(crate) fn copy_into(&self, out: &mut [u8]) -> usize {
        let ReadTarget::Fixed { data, .. } = &self.target else {
            return 0;
        };

        let data = data.borrow();
        let n = self.length.get().min(data.len()).min(out.len());
        out[..n].copy_from_slice(&data[..n]);
        n
    }

    /// Hands the queue back to the caller.
    pub(crate) fn take_queue(&self) -> BufQueue {
        match &self.target {
            ReadTarget::Queue { queue, .. } => mem::take(&mut *queue.borrow_mut()),
            ReadTarget::Fixed { .. } => BufQueue::new(),
        }
    }

    /// Uninstalls the observer and disarms the timer.
    fn detach(&self) {
        if let Some(socket) = self.socket.upgrade() {
            socket.set_read_cb(None);
        }

        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    pub(crate) fn timeout_expired(&self) {
        trace!(length = self.length.get(), "read timeout expired");

        // It takes another read to install an observer again.
        if let Some(socket) = self.socket.upgrade() {
            socket.set_read_cb(None);
        }
        self.timer.take();

        if self.completion.is_done() {
            return;
        }

        if self.length.get() == 0 {
            self.timed_out.set(true);
        }

        self.completion.finish();
    }
}

impl ReadCallback for ReadOperation {
    fn fill_read_buffer(
        &self,
        fill: &mut dyn FnMut(&mut [u8]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        match &self.target {
            ReadTarget::Fixed { data, capacity } => {
                let mut data = data.borrow_mut();
                let start = data.len();
                let want = capacity.saturating_sub(start).min(FIXED_READ_CHUNK);

                trace!(remaining = capacity - start, "fill_read_buffer");

                data.resize(start + want, 0);
                let result = fill(&mut data[start..]);
                data.truncate(start + *result.as_ref().unwrap_or(&0));
                result
            }

            ReadTarget::Queue {
                queue,
                min_read,
                alloc,
            } => {
                let mut queue = queue.borrow_mut();
                fill(queue.preallocate(*min_read, *alloc))
            }
        }
    }

    fn read_data_available(&self, len: usize) {
        trace!(len, "read_data_available");

        if self.completion.is_done() {
            debug!(len, "data after completion ignored");
            return;
        }

        self.length.set(self.length.get() + len);

        let complete = match &self.target {
            ReadTarget::Fixed { capacity, .. } => self.length.get() >= *capacity,
            ReadTarget::Queue { queue, .. } => {
                queue.borrow_mut().postallocate(len);
                true
            }
        };

        if complete {
            self.detach();
            self.completion.finish();
        }
    }

    fn read_eof(&self) {
        trace!("read_eof");

        if self.completion.is_done() {
            debug!("end of stream after completion ignored");
            return;
        }

        self.detach();
        self.eof.set(true);
        self.completion.finish();
    }

    fn read_err(&self, error: SocketError) {
        trace!(%error, "read_err");

        if self.completion.is_done() {
            debug!(%error, "read error after completion ignored");
            return;
        }

        self.detach();
        *self.error.borrow_mut() = Some(error);
        self.completion.finish();
    }
}

impl Abortable for ReadOperation {
    fn completion(&self) -> &Completion {
        &self.completion
    }

    fn abort(&self) {
        self.detach();
    }
}
