use libc::{
    CLOCK_MONOTONIC, EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, TFD_CLOEXEC,
    TFD_NONBLOCK, c_int, epoll_create1, epoll_ctl, epoll_event, epoll_wait, eventfd, itimerspec,
    read, timerfd_create, timerfd_settime, write,
};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem};

/// Size of the counter exchanged with `eventfd` and `timerfd`.
const COUNTER_LEN: usize = mem::size_of::<u64>();

/// Wraps a freshly created descriptor, turning a negative return into an error.
fn owned(fd: c_int) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Creates a close-on-exec `epoll` instance.
pub(crate) fn sys_epoll_create() -> io::Result<OwnedFd> {
    owned(unsafe { epoll_create1(EPOLL_CLOEXEC) })
}

/// Adds `fd` to the epoll interest list with the given flags and token.
pub(crate) fn sys_epoll_add(epoll: &OwnedFd, fd: RawFd, flags: u32, token: u64) -> io::Result<()> {
    let mut event = epoll_event {
        events: flags,
        u64: token,
    };

    let rc = unsafe { epoll_ctl(epoll.as_raw_fd(), EPOLL_CTL_ADD, fd, &mut event) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Waits for readiness, filling `events` with what the kernel reported.
///
/// `timeout_ms` of `-1` blocks indefinitely.
pub(crate) fn sys_epoll_wait(
    epoll: &OwnedFd,
    events: &mut Vec<epoll_event>,
    timeout_ms: c_int,
) -> io::Result<usize> {
    events.clear();

    let n = unsafe {
        epoll_wait(
            epoll.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as c_int,
            timeout_ms,
        )
    };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { events.set_len(n as usize) };

    Ok(n as usize)
}

/// Creates a non-blocking `eventfd` with a zero counter.
pub(crate) fn sys_eventfd() -> io::Result<OwnedFd> {
    owned(unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) })
}

/// Creates a non-blocking `timerfd` on the monotonic clock.
pub(crate) fn sys_timerfd() -> io::Result<OwnedFd> {
    owned(unsafe { timerfd_create(CLOCK_MONOTONIC, TFD_NONBLOCK | TFD_CLOEXEC) })
}

/// Programs a one-shot `timerfd` expiration `after` from now.
///
/// A zero duration disarms the timer.
pub(crate) fn sys_timerfd_set(fd: &OwnedFd, after: Duration) -> io::Result<()> {
    let mut spec: itimerspec = unsafe { mem::zeroed() };
    spec.it_value.tv_sec = after.as_secs() as libc::time_t;
    spec.it_value.tv_nsec = after.subsec_nanos() as libc::c_long;

    let rc = unsafe { timerfd_settime(fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Adds one to an `eventfd` counter.
pub(crate) fn sys_write_counter(fd: &OwnedFd) -> io::Result<()> {
    let buf: u64 = 1;

    let n = unsafe { write(fd.as_raw_fd(), &buf as *const u64 as *const _, COUNTER_LEN) };
    if n < 0 {
        let err = io::Error::last_os_error();

        // The counter is saturated, so the descriptor is readable anyway.
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }

    Ok(())
}

/// Reads and resets an `eventfd` or `timerfd` counter.
///
/// Returns `0` when nothing was pending.
pub(crate) fn sys_read_counter(fd: &OwnedFd) -> io::Result<u64> {
    let mut buf: u64 = 0;

    let n = unsafe { read(fd.as_raw_fd(), &mut buf as *mut u64 as *mut _, COUNTER_LEN) };
    if n < 0 {
        let err = io::Error::last_os_error();

        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(buf)
}
