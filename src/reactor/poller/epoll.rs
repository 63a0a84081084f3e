//! Linux `epoll`-based poller implementation.
//!
//! The loop registers its four wake sources once at construction and
//! then only waits. Events are reported in the order the kernel returned
//! them, which is the order the loop dispatches them in.

use super::platform::{sys_epoll_add, sys_epoll_create, sys_epoll_wait};
use crate::error::{Error, Result};
use crate::reactor::event::Source;

use libc::{EPOLLIN, epoll_event};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

/// Linux `epoll` poller.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: OwnedFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Creates a poller able to report up to `capacity` events per wait.
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        let epoll = sys_epoll_create().map_err(Error::io("epoll_create1"))?;

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity),
        })
    }

    /// Registers a wake source for read readiness.
    pub(crate) fn register(&self, fd: RawFd, source: Source) -> Result<()> {
        sys_epoll_add(&self.epoll, fd, EPOLLIN as u32, source.token())
            .map_err(Error::io("epoll_ctl"))
    }

    /// Blocks until a registered source is ready or `timeout` elapses.
    ///
    /// Ready sources are appended to `ready` in the order reported by the
    /// kernel. An interrupted wait reports nothing.
    pub(crate) fn poll(&mut self, ready: &mut Vec<Source>, timeout: Option<Duration>) -> Result<()> {
        ready.clear();

        let timeout_ms = timeout.map(timeout_millis).unwrap_or(-1);

        match sys_epoll_wait(&self.epoll, &mut self.events, timeout_ms) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(Error::io("epoll_wait")(err)),
        }

        for event in &self.events {
            let token = event.u64;
            if let Some(source) = Source::from_token(token) {
                if !ready.contains(&source) {
                    ready.push(source);
                }
            }
        }

        Ok(())
    }
}

/// Rounds a timeout up to whole milliseconds so a short wait never
/// degenerates into a busy poll.
fn timeout_millis(timeout: Duration) -> i32 {
    let mut ms = timeout.as_millis();
    if Duration::from_millis(ms as u64) < timeout {
        ms += 1;
    }

    ms.min(i32::MAX as u128) as i32
}

impl AsRawFd for EpollPoller {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

impl AsFd for EpollPoller {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.epoll.as_fd()
    }
}
