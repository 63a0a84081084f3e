use super::poller::platform::{sys_eventfd, sys_read_counter, sys_write_counter};
use crate::error::{Error, Result};

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// A cross-thread "signal then consume" wake source backed by `eventfd`.
///
/// Any number of signals before a [`consume`](Self::consume) coalesce
/// into a single readiness notification.
pub(crate) struct WakeCounter(OwnedFd);

impl WakeCounter {
    pub(crate) fn new() -> Result<Self> {
        let fd = sys_eventfd().map_err(Error::io("eventfd"))?;

        Ok(Self(fd))
    }

    /// Marks the counter ready. Safe to call from any thread.
    pub(crate) fn signal(&self) {
        if let Err(err) = sys_write_counter(&self.0) {
            // Only possible if the descriptor itself is broken; the next
            // wait() on it reports the failure.
            tracing::error!(fd = self.0.as_raw_fd(), error = %err, "failed to signal wake counter");
        }
    }

    /// Clears any pending signal.
    ///
    /// Returns whether a signal was pending.
    pub(crate) fn consume(&self) -> Result<bool> {
        let count = sys_read_counter(&self.0).map_err(Error::io("eventfd read"))?;

        Ok(count > 0)
    }
}

impl AsRawFd for WakeCounter {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}
