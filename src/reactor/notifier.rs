use super::poller::platform::{sys_read_counter, sys_timerfd, sys_timerfd_set};
use crate::error::{Error, Result};

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

/// Shortest interval the notifier is ever armed with.
///
/// `timerfd` treats a zero value as "disarm", so overdue deadlines are
/// clamped to this instead and fire on the next wait.
const MIN_ARM: Duration = Duration::from_nanos(1);

/// A one-shot alarm backed by `timerfd` that becomes readable once the
/// armed deadline is reached.
pub(crate) struct ExpirationNotifier {
    fd: OwnedFd,

    /// Deadline currently programmed, if any.
    armed: Option<Instant>,
}

impl ExpirationNotifier {
    pub(crate) fn new() -> Result<Self> {
        let fd = sys_timerfd().map_err(Error::io("timerfd_create"))?;

        Ok(Self { fd, armed: None })
    }

    /// Arms the notifier for `deadline`, replacing any earlier deadline.
    pub(crate) fn arm(&mut self, deadline: Instant) -> Result<()> {
        let after = deadline.saturating_duration_since(Instant::now()).max(MIN_ARM);

        sys_timerfd_set(&self.fd, after).map_err(Error::io("timerfd_settime"))?;
        self.armed = Some(deadline);

        tracing::trace!(?after, "expiration notifier armed");
        Ok(())
    }

    /// Cancels any pending deadline.
    pub(crate) fn disarm(&mut self) -> Result<()> {
        if self.armed.take().is_some() {
            sys_timerfd_set(&self.fd, Duration::ZERO).map_err(Error::io("timerfd_settime"))?;
            tracing::trace!("expiration notifier disarmed");
        }

        Ok(())
    }

    /// Arms for `deadline` when present, otherwise disarms.
    pub(crate) fn rearm(&mut self, deadline: Option<Instant>) -> Result<()> {
        match deadline {
            Some(deadline) => self.arm(deadline),
            None => self.disarm(),
        }
    }

    /// Clears the expiration readiness.
    ///
    /// Returns whether the notifier had fired.
    pub(crate) fn consume(&mut self) -> Result<bool> {
        let count = sys_read_counter(&self.fd).map_err(Error::io("timerfd read"))?;
        if count > 0 {
            self.armed = None;
        }

        Ok(count > 0)
    }

    #[cfg(test)]
    pub(crate) fn armed(&self) -> Option<Instant> {
        self.armed
    }
}

impl AsRawFd for ExpirationNotifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
