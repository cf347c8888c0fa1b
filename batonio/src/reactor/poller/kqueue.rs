//! macOS `kqueue`-based poller implementation.
//!
//! Read and write interests map onto separate `EVFILT_READ` /
//! `EVFILT_WRITE` filters; a user event (`EVFILT_USER`) is used as the
//! wake-up source.

use super::common::Interest;
use super::timeout_millis;
use crate::reactor::event::Event;
use crate::reactor::poller::Waker;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of the wake-up user event.
const WAKE_IDENT: usize = usize::MAX;

pub(crate) struct KqueuePoller {
    kqueue: RawFd,
    events: Vec<kevent>,
    waker: Arc<Waker>,
}

impl Waker {
    /// Wake the poller by triggering the user event.
    pub(crate) fn wake(&self) {
        let event = change(WAKE_IDENT, EVFILT_USER, 0, NOTE_TRIGGER, 0);
        unsafe {
            kevent(self.0, &event, 1, ptr::null_mut(), 0, ptr::null());
        }
    }
}

fn change(ident: usize, filter: i16, flags: u16, fflags: u32, token: usize) -> kevent {
    kevent {
        ident,
        filter,
        flags,
        fflags,
        data: 0,
        udata: token as *mut _,
    }
}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kqueue = unsafe { kqueue() };
        if kqueue < 0 {
            return Err(io::Error::last_os_error());
        }

        let event = change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_ENABLE | EV_CLEAR, 0, 0);

        let ret = unsafe { kevent(kqueue, &event, 1, ptr::null_mut(), 0, ptr::null()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kqueue) };
            return Err(err);
        }

        Ok(KqueuePoller {
            kqueue,
            events: Vec::with_capacity(capacity.max(1)),
            waker: Arc::new(Waker(kqueue)),
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        let _ = self.apply(fd, 0, Interest::NONE);
    }

    /// Adds the wanted filters and deletes the others.
    fn apply(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let filters = [(EVFILT_READ, interest.read), (EVFILT_WRITE, interest.write)];

        for (filter, wanted) in filters {
            let flags = if wanted { EV_ADD | EV_ENABLE } else { EV_DELETE };
            let event = change(fd as usize, filter, flags, 0, token);

            let rc = unsafe { kevent(self.kqueue, &event, 1, ptr::null_mut(), 0, ptr::null()) };

            // Deleting a filter that was never added reports ENOENT.
            if rc < 0 && wanted {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let timespec = match timeout_millis(timeout) {
            -1 => None,
            ms => Some(timespec {
                tv_sec: (ms / 1000) as _,
                tv_nsec: ((ms % 1000) * 1_000_000) as _,
            }),
        };
        let timeout_ptr = timespec
            .as_ref()
            .map(|t| t as *const timespec)
            .unwrap_or(ptr::null());

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // SAFETY: the kernel initialized the first `n` entries.
        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.filter == EVFILT_USER {
                continue;
            }

            let token = ev.udata as usize;
            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;

            let readable = ev.filter == EVFILT_READ || failed;
            let writable = ev.filter == EVFILT_WRITE || failed;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqueue);
        }
    }
}
