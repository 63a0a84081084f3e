use super::registry::{Callback, TimerId, TimerRegistry};
use crate::main_loop::LoopHandle;

use std::sync::Weak;
use std::time::{Duration, Instant};

/// A movable, detachable handle to one timer on a [`MainLoop`].
///
/// A `Timer` starts out unbound. Starting it binds it to the loop's timer
/// registry through a weak reference, so the handle never keeps the loop
/// alive and never calls into a loop that has been dropped: once the loop
/// is gone every operation on the handle silently does nothing.
///
/// Dropping a `Timer` stops it. Moving one (including with
/// [`std::mem::take`]) carries the scheduled timer along, since the
/// registry only knows the timer's id.
///
/// Callbacks always run on the thread driving the loop, while the loop's
/// timer lock is held. They may start or stop any timer, including the
/// one that is firing.
///
/// [`MainLoop`]: crate::MainLoop
///
/// # Examples
///
/// ```rust,no_run
/// use mainloop::{MainLoop, Timer};
/// use std::time::Duration;
///
/// let mut main_loop = MainLoop::new()?;
/// let handle = main_loop.handle();
///
/// let mut timer = Timer::new();
/// timer.start(&main_loop, Duration::from_millis(10), move || handle.exit(0));
///
/// assert_eq!(main_loop.run()?, 0);
/// # Ok::<(), mainloop::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Timer {
    registry: Weak<TimerRegistry>,
    id: Option<TimerId>,
}

impl Timer {
    /// Creates an unbound timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `callback` once after `delay`.
    ///
    /// A delay too large to represent as an [`Instant`] never fires.
    pub fn start<L, F>(&mut self, main_loop: &L, delay: Duration, callback: F)
    where
        L: AsRef<LoopHandle> + ?Sized,
        F: FnMut() + Send + 'static,
    {
        self.schedule(
            main_loop.as_ref(),
            Instant::now().checked_add(delay),
            Duration::ZERO,
            Box::new(callback),
        );
    }

    /// Fires `callback` once at `expiration`.
    ///
    /// An expiration in the past fires on the loop's next dispatch.
    pub fn start_at<L, F>(&mut self, main_loop: &L, expiration: Instant, callback: F)
    where
        L: AsRef<LoopHandle> + ?Sized,
        F: FnMut() + Send + 'static,
    {
        self.schedule(
            main_loop.as_ref(),
            Some(expiration),
            Duration::ZERO,
            Box::new(callback),
        );
    }

    /// Fires `callback` every `interval`, starting one interval from now.
    ///
    /// A zero interval behaves like a one-shot [`start`](Self::start).
    pub fn start_repeat<L, F>(&mut self, main_loop: &L, interval: Duration, callback: F)
    where
        L: AsRef<LoopHandle> + ?Sized,
        F: FnMut() + Send + 'static,
    {
        self.schedule(
            main_loop.as_ref(),
            Instant::now().checked_add(interval),
            interval,
            Box::new(callback),
        );
    }

    /// Fires `callback` after `delay`, then every `interval`.
    pub fn start_repeat_after<L, F>(
        &mut self,
        main_loop: &L,
        delay: Duration,
        interval: Duration,
        callback: F,
    ) where
        L: AsRef<LoopHandle> + ?Sized,
        F: FnMut() + Send + 'static,
    {
        self.schedule(
            main_loop.as_ref(),
            Instant::now().checked_add(delay),
            interval,
            Box::new(callback),
        );
    }

    /// Fires `callback` at `start`, then every `interval`.
    ///
    /// Later expirations stay on the `start + n * interval` grid no matter
    /// how late each dispatch runs.
    pub fn start_repeat_at<L, F>(
        &mut self,
        main_loop: &L,
        start: Instant,
        interval: Duration,
        callback: F,
    ) where
        L: AsRef<LoopHandle> + ?Sized,
        F: FnMut() + Send + 'static,
    {
        self.schedule(main_loop.as_ref(), Some(start), interval, Box::new(callback));
    }

    /// Cancels the timer and unbinds the handle.
    ///
    /// Does nothing if the timer was never started or its loop is gone.
    pub fn stop(&mut self) {
        let registry = std::mem::take(&mut self.registry);

        if let (Some(id), Some(registry)) = (self.id.take(), registry.upgrade()) {
            registry.remove(id);
        }
    }

    /// Whether the handle refers to a timer on a live loop.
    pub fn is_bound(&self) -> bool {
        self.id.is_some() && self.registry.strong_count() > 0
    }

    /// Whether the timer is still scheduled to fire.
    ///
    /// A one-shot timer becomes inactive once it has fired.
    pub fn is_active(&self) -> bool {
        self.expiration().is_some()
    }

    /// Next scheduled expiration, if the timer is active.
    pub fn expiration(&self) -> Option<Instant> {
        let id = self.id?;
        let registry = self.registry.upgrade()?;

        registry.expiration(id)
    }

    /// Binds to `main_loop`'s registry and (re)schedules the timer there.
    ///
    /// Restarting on the same loop keeps the existing id; starting on
    /// another loop first stops the timer on the old one. A `None`
    /// expiration lies beyond what `Instant` can represent: the timer is
    /// bound but never fires.
    fn schedule(
        &mut self,
        main_loop: &LoopHandle,
        expiration: Option<Instant>,
        interval: Duration,
        callback: Callback,
    ) {
        let target = main_loop.timers();

        if !Weak::ptr_eq(&self.registry, target) {
            self.stop();
        }

        let Some(registry) = target.upgrade() else {
            self.stop();
            return;
        };

        let id = registry.set(self.id, expiration, interval, callback);

        self.registry = target.clone();
        self.id = Some(id);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
