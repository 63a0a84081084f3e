use super::deferred::DeferredQueue;
use crate::error::Result;
use crate::reactor::WakeCounter;
use crate::timer::TimerRegistry;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Exit code reported by a loop that exited without an explicit code.
pub const EXIT_SUCCESS: i32 = 0;

/// Loop state reachable from other threads.
pub(crate) struct Shared {
    name: String,

    deferred: DeferredQueue,

    /// `Some(code)` once `exit` was called. The first code wins.
    exit: Mutex<Option<i32>>,
    exit_wake: WakeCounter,
}

impl Shared {
    pub(crate) fn new(name: String) -> Result<Self> {
        Ok(Self {
            name,
            deferred: DeferredQueue::new()?,
            exit: Mutex::new(None),
            exit_wake: WakeCounter::new()?,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub(crate) fn exit_wake(&self) -> &WakeCounter {
        &self.exit_wake
    }

    fn exit(&self, code: i32) {
        {
            let mut exit = self.exit.lock();
            if exit.is_some() {
                return;
            }
            *exit = Some(code);
        }

        tracing::debug!(name = %self.name, code, "exit requested");
        self.exit_wake.signal();
    }

    fn exited(&self) -> bool {
        self.exit.lock().is_some()
    }

    fn exit_code(&self) -> i32 {
        self.exit.lock().unwrap_or(EXIT_SUCCESS)
    }
}

/// A cloneable, thread-safe handle to a [`MainLoop`](crate::MainLoop).
///
/// Handles let other threads, and callbacks running on the loop itself,
/// request an exit, queue functions and start timers. A handle does not
/// keep the loop's timers alive: starting a [`Timer`](crate::Timer)
/// through a handle whose loop was dropped does nothing.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
    timers: Weak<TimerRegistry>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<Shared>, timers: Weak<TimerRegistry>) -> Self {
        Self { shared, timers }
    }

    /// Asks the loop to stop with `code`.
    ///
    /// Only the first call has an effect. A callback already running is
    /// not interrupted; the loop stops before handling anything else.
    pub fn exit(&self, code: i32) {
        self.shared.exit(code);
    }

    /// Whether [`exit`](Self::exit) has been called.
    pub fn exited(&self) -> bool {
        self.shared.exited()
    }

    /// The code passed to [`exit`](Self::exit), or [`EXIT_SUCCESS`].
    pub fn exit_code(&self) -> i32 {
        self.shared.exit_code()
    }

    /// Queues `f` to run once on the loop thread.
    ///
    /// Functions run in the order they were queued.
    pub fn run_in<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.deferred().add(Box::new(f));
    }

    /// Name the loop was built with.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn timers(&self) -> &Weak<TimerRegistry> {
        &self.timers
    }
}

impl AsRef<LoopHandle> for LoopHandle {
    fn as_ref(&self) -> &LoopHandle {
        self
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.shared.name)
            .field("exited", &self.exited())
            .finish()
    }
}
