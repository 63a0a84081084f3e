use crate::error::Result;
use crate::reactor::WakeCounter;

use parking_lot::Mutex;
use std::os::fd::{AsRawFd, RawFd};

/// A function queued with `run_in`.
pub(crate) type Deferred = Box<dyn FnOnce() + Send>;

/// FIFO of one-shot functions to run on the loop thread.
///
/// Producers append under a short lock from any thread. The loop swaps
/// the whole queue out and runs it without the lock, so a function may
/// queue more work; that work runs on the next drain.
///
/// Once [`close`](Self::close)d the queue drops whatever it is given.
/// Queued functions often capture a handle to the loop that owns this
/// queue, so pending work has to be released when the loop goes away.
pub(crate) struct DeferredQueue {
    /// `None` once closed.
    queue: Mutex<Option<Vec<Deferred>>>,
    wake: WakeCounter,
}

impl DeferredQueue {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            queue: Mutex::new(Some(Vec::new())),
            wake: WakeCounter::new()?,
        })
    }

    /// Appends `f` and wakes the loop.
    pub(crate) fn add(&self, f: Deferred) {
        let rejected = match self.queue.lock().as_mut() {
            Some(queue) => {
                queue.push(f);
                None
            }
            None => Some(f),
        };

        match rejected {
            // Dropped outside the lock; its captures may queue more work.
            Some(f) => drop(f),
            None => self.wake.signal(),
        }
    }

    /// Drops every pending function and rejects later ones.
    ///
    /// Returns how many functions were dropped.
    pub(crate) fn close(&self) -> usize {
        let pending = self.queue.lock().take().unwrap_or_default();
        pending.len()
    }

    /// Runs everything queued so far, in order.
    ///
    /// Returns how many functions ran.
    pub(crate) fn dispatch(&self) -> usize {
        let batch = self
            .queue
            .lock()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default();
        let count = batch.len();

        for f in batch {
            f();
        }

        count
    }

    /// Clears the wake signal. Call before [`dispatch`](Self::dispatch)
    /// so functions added during the drain wake the loop again.
    pub(crate) fn consume_wake(&self) -> Result<bool> {
        self.wake.consume()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.lock().as_ref().map_or(0, Vec::len)
    }
}

impl AsRawFd for DeferredQueue {
    fn as_raw_fd(&self) -> RawFd {
        self.wake.as_raw_fd()
    }
}
