use super::builder::MainLoopBuilder;
use super::handle::{LoopHandle, Shared};
use crate::error::Result;
use crate::reactor::{ExpirationNotifier, Poller, Source};
use crate::timer::TimerRegistry;

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single-threaded, readiness-driven event loop.
///
/// The loop blocks on four wake sources and handles whichever became
/// ready:
/// - an exit request,
/// - functions queued with [`run_in`](Self::run_in),
/// - expiration of the earliest [`Timer`](crate::Timer),
/// - a change to the set of timers, which re-arms the expiration notifier.
///
/// Every callback runs on the thread calling [`run`](Self::run) or
/// [`dispatch`](Self::dispatch). Other threads talk to the loop through a
/// [`LoopHandle`].
///
/// The loop is the only owner of its timers. Dropping it drops every timer
/// immediately; outstanding [`Timer`](crate::Timer) handles become inert.
///
/// Its descriptor ([`AsRawFd`]) becomes readable whenever one of its
/// sources is ready, so it can be nested inside another reactor.
pub struct MainLoop {
    /// Poller watching the four wake sources.
    poller: Poller,

    /// Armed for the earliest active timer.
    notifier: ExpirationNotifier,

    /// Sole strong reference to the timer registry.
    timers: Arc<TimerRegistry>,

    /// Exit state and deferred queue, shared with handles.
    handle: LoopHandle,

    /// Sources reported by the last `wait()`, in kernel order.
    ready: Vec<Source>,
}

impl MainLoop {
    /// Creates a loop with default configuration.
    pub fn new() -> Result<Self> {
        MainLoopBuilder::new().build()
    }

    /// Returns a builder for a configured loop.
    pub fn builder() -> MainLoopBuilder {
        MainLoopBuilder::new()
    }

    pub(crate) fn with_config(event_capacity: usize, name: String) -> Result<Self> {
        let poller = Poller::new(event_capacity)?;
        let notifier = ExpirationNotifier::new()?;
        let timers = Arc::new(TimerRegistry::new()?);
        let shared = Arc::new(Shared::new(name)?);

        poller.register(shared.exit_wake().as_raw_fd(), Source::Exit)?;
        poller.register(shared.deferred().as_raw_fd(), Source::Deferred)?;
        poller.register(notifier.as_raw_fd(), Source::TimerExpired)?;
        poller.register(timers.as_raw_fd(), Source::TimerChanged)?;

        tracing::debug!(
            name = %shared.name(),
            epoll = poller.as_raw_fd(),
            "main loop created"
        );

        let handle = LoopHandle::new(shared, Arc::downgrade(&timers));

        Ok(Self {
            poller,
            notifier,
            timers,
            handle,
            ready: Vec::with_capacity(Source::ALL.len()),
        })
    }

    /// Returns a handle usable from other threads and from callbacks.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Runs until [`exit`](Self::exit) is called and returns the exit code.
    ///
    /// May be called again after it returned, in which case it returns the
    /// stored code immediately.
    pub fn run(&mut self) -> Result<i32> {
        while !self.exited() {
            if self.wait(None)? {
                self.dispatch()?;
            }
        }

        self.clear_exit_wake()?;

        let code = self.exit_code();
        tracing::debug!(name = %self.handle.name(), code, "main loop finished");

        Ok(code)
    }

    /// Blocks until a wake source is ready or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns whether anything became ready;
    /// an exited loop returns `false` without waiting. The ready sources
    /// are kept for the next [`dispatch`](Self::dispatch).
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.exited() {
            self.ready.clear();
            return Ok(false);
        }

        self.poller.poll(&mut self.ready, timeout)?;

        tracing::trace!(ready = self.ready.len(), ?timeout, "wait returned");
        Ok(!self.ready.is_empty())
    }

    /// Handles the sources reported by the preceding [`wait`](Self::wait),
    /// in the order they were reported.
    ///
    /// Processing stops as soon as the loop has exited; the remaining
    /// sources of the batch are dropped and picked up again by a later
    /// wait if still ready. Panics from callbacks propagate to the caller.
    pub fn dispatch(&mut self) -> Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        let result = self.dispatch_batch(&ready);

        ready.clear();
        self.ready = ready;

        result?;

        if self.exited() {
            self.clear_exit_wake()?;
        }

        Ok(())
    }

    fn dispatch_batch(&mut self, ready: &[Source]) -> Result<()> {
        for &source in ready {
            if self.exited() {
                break;
            }

            tracing::trace!(?source, "dispatching");

            match source {
                Source::Exit => {
                    self.clear_exit_wake()?;
                    break;
                }
                Source::Deferred => {
                    let deferred = self.handle.shared().deferred();
                    deferred.consume_wake()?;

                    let ran = deferred.dispatch();
                    tracing::trace!(ran, "deferred functions drained");
                }
                Source::TimerExpired => {
                    self.notifier.consume()?;

                    let fired = self.timers.dispatch(Instant::now());
                    tracing::trace!(fired, "timers dispatched");

                    self.rearm()?;
                }
                Source::TimerChanged => {
                    self.timers.consume_changed()?;
                    self.rearm()?;
                }
            }
        }

        Ok(())
    }

    /// Consumes the exit signal so the loop's descriptor stops reporting
    /// it to an outer poller, wherever the exit landed in the batch.
    fn clear_exit_wake(&self) -> Result<()> {
        self.handle.shared().exit_wake().consume()?;
        Ok(())
    }

    /// Points the expiration notifier at the earliest active timer.
    fn rearm(&mut self) -> Result<()> {
        self.notifier
            .rearm(self.timers.earliest_active_expiration())
    }

    /// Asks the loop to stop with `code`. Only the first call has an effect.
    pub fn exit(&self, code: i32) {
        self.handle.exit(code);
    }

    /// Whether [`exit`](Self::exit) has been called.
    pub fn exited(&self) -> bool {
        self.handle.exited()
    }

    /// The code passed to [`exit`](Self::exit), or
    /// [`EXIT_SUCCESS`](crate::EXIT_SUCCESS).
    pub fn exit_code(&self) -> i32 {
        self.handle.exit_code()
    }

    /// Queues `f` to run once on the loop thread.
    pub fn run_in<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run_in(f);
    }

    /// Number of timers registered on this loop, including fired
    /// one-shots whose handles are still alive.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        // Pending functions may hold handles that keep the shared state,
        // and with it the wake descriptors, alive.
        let dropped = self.handle.shared().deferred().close();

        tracing::debug!(name = %self.handle.name(), dropped, "main loop dropped");
    }
}

impl AsRef<LoopHandle> for MainLoop {
    fn as_ref(&self) -> &LoopHandle {
        &self.handle
    }
}

impl AsRawFd for MainLoop {
    fn as_raw_fd(&self) -> RawFd {
        self.poller.as_raw_fd()
    }
}

impl AsFd for MainLoop {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.poller.as_fd()
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("name", &self.handle.name())
            .field("fd", &self.poller.as_raw_fd())
            .field("timers", &self.timers.len())
            .field("exited", &self.exited())
            .finish()
    }
}
