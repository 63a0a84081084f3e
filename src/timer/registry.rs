use crate::error::Result;
use crate::reactor::WakeCounter;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// Identifier of an entry inside one [`TimerRegistry`].
pub(crate) type TimerId = NonZeroU64;

/// Boxed timer callback.
pub(crate) type Callback = Box<dyn FnMut() + Send>;

/// A scheduled timer owned by the registry.
pub(crate) struct TimerEntry {
    /// Next expiration; `None` while inactive (fired one-shot).
    expiration: Option<Instant>,

    /// Zero for one-shot timers.
    interval: Duration,

    /// Taken out while the callback runs.
    callback: Option<Callback>,
}

impl TimerEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expiration, Some(expiration) if expiration <= now)
    }

    /// Moves the entry past its current expiration.
    ///
    /// Repeating timers keep their phase: the interval is added to the
    /// previous expiration, not to the current time. An expiration past
    /// what `Instant` can represent never comes, so the timer goes
    /// inactive.
    fn advance(&mut self) {
        self.expiration = match self.expiration {
            Some(expiration) if !self.interval.is_zero() => expiration.checked_add(self.interval),
            _ => None,
        };
    }
}

struct Timers {
    entries: BTreeMap<TimerId, TimerEntry>,
    last_id: u64,
}

impl Timers {
    /// Next unused non-zero id. Ids grow with creation order, so the
    /// map iterates timers in the order they were first started.
    fn next_id(&mut self) -> TimerId {
        loop {
            self.last_id = self.last_id.wrapping_add(1);

            if let Some(id) = NonZeroU64::new(self.last_id) {
                if !self.entries.contains_key(&id) {
                    return id;
                }
            }
        }
    }

    fn has_expired(&self, now: Instant) -> bool {
        self.entries.values().any(|entry| entry.is_expired(now))
    }
}

/// Every timer scheduled on one main loop.
///
/// The registry may be mutated from any thread and is dispatched from
/// the loop thread. All access goes through a reentrant lock so a
/// callback running under [`dispatch`](Self::dispatch) can start or stop
/// timers, including its own, on the same thread.
///
/// The registry never refers back to [`Timer`](crate::Timer) handles;
/// handles only remember the id they were given.
pub(crate) struct TimerRegistry {
    timers: ReentrantMutex<RefCell<Timers>>,

    /// Signalled whenever the set of timers or an expiration changes.
    changed: WakeCounter,
}

impl TimerRegistry {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            timers: ReentrantMutex::new(RefCell::new(Timers {
                entries: BTreeMap::new(),
                last_id: 0,
            })),
            changed: WakeCounter::new()?,
        })
    }

    /// Inserts or overwrites a timer and returns its id.
    ///
    /// A fresh id is generated when `id` is `None`. A `None` expiration
    /// registers the timer inactive.
    pub(crate) fn set(
        &self,
        id: Option<TimerId>,
        expiration: impl Into<Option<Instant>>,
        interval: Duration,
        callback: Callback,
    ) -> TimerId {
        let guard = self.timers.lock();

        let (id, replaced) = {
            let mut timers = guard.borrow_mut();
            let id = id.unwrap_or_else(|| timers.next_id());

            let entry = TimerEntry {
                expiration: expiration.into(),
                interval,
                callback: Some(callback),
            };

            (id, timers.entries.insert(id, entry))
        };

        // The old callback may own timers whose drop re-enters the registry.
        drop(replaced);

        self.changed.signal();
        id
    }

    /// Erases a timer. Unknown ids are ignored.
    pub(crate) fn remove(&self, id: TimerId) {
        let guard = self.timers.lock();

        let removed = guard.borrow_mut().entries.remove(&id);
        if removed.is_some() {
            drop(removed);
            self.changed.signal();
        }
    }

    /// Next expiration of the timer, or `None` if unknown or inactive.
    pub(crate) fn expiration(&self, id: TimerId) -> Option<Instant> {
        let guard = self.timers.lock();
        let timers = guard.borrow();

        timers.entries.get(&id).and_then(|entry| entry.expiration)
    }

    /// Number of registered timers, active or not.
    pub(crate) fn len(&self) -> usize {
        self.timers.lock().borrow().entries.len()
    }

    /// Earliest expiration among active timers.
    pub(crate) fn earliest_active_expiration(&self) -> Option<Instant> {
        let guard = self.timers.lock();
        let timers = guard.borrow();

        timers
            .entries
            .values()
            .filter_map(|entry| entry.expiration)
            .min()
    }

    /// Fires every expired timer, then keeps sweeping while the sweep
    /// itself took long enough for more timers to expire.
    ///
    /// A repeating timer whose interval is shorter than the time its
    /// callbacks take keeps this loop going; that is accepted.
    ///
    /// Returns the number of callbacks invoked.
    pub(crate) fn dispatch(&self, now: Instant) -> usize {
        let guard = self.timers.lock();

        let mut now = now;
        let mut total = 0;
        let mut pass = 0;

        loop {
            pass += 1;

            let fired = sweep(&guard, now);
            total += fired;

            tracing::trace!(pass, fired, "timer sweep");

            if fired == 0 {
                break;
            }

            now = now.max(Instant::now());
            if !guard.borrow().has_expired(now) {
                break;
            }
        }

        total
    }

    /// Clears the changed signal.
    pub(crate) fn consume_changed(&self) -> Result<bool> {
        self.changed.consume()
    }
}

/// One pass over all timers present when the pass started.
///
/// Keys are snapshotted and looked up again one by one, so callbacks may
/// add or remove timers mid-pass. Removed timers are skipped and timers
/// added during the pass wait for the next one.
fn sweep(timers: &RefCell<Timers>, now: Instant) -> usize {
    let ids: Vec<TimerId> = timers.borrow().entries.keys().copied().collect();
    let mut fired = 0;

    for id in ids {
        let callback = {
            let mut timers = timers.borrow_mut();
            let Some(entry) = timers.entries.get_mut(&id) else {
                continue;
            };

            if !entry.is_expired(now) {
                continue;
            }

            entry.advance();
            entry.callback.take()
        };

        let Some(mut callback) = callback else {
            continue;
        };

        fired += 1;

        let unwind = UnwindGuard {
            timers,
            id,
            armed: true,
        };
        callback();
        unwind.disarm();

        // Put the callback back unless the timer was stopped or
        // restarted with a new callback while it ran.
        let leftover = {
            let mut timers = timers.borrow_mut();
            match timers.entries.get_mut(&id) {
                Some(entry) if entry.callback.is_none() => {
                    entry.callback = Some(callback);
                    None
                }
                _ => Some(callback),
            }
        };

        drop(leftover);
    }

    fired
}

/// Unregisters a timer whose callback panicked, so it does not linger as
/// an active entry that can never fire again.
struct UnwindGuard<'a> {
    timers: &'a RefCell<Timers>,
    id: TimerId,
    armed: bool,
}

impl UnwindGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let removed = match self.timers.try_borrow_mut() {
            Ok(mut timers) => timers.entries.remove(&self.id),
            Err(_) => None,
        };

        tracing::warn!(id = self.id.get(), "timer callback panicked, timer removed");
        drop(removed);
    }
}

impl AsRawFd for TimerRegistry {
    /// Descriptor of the "timers changed" wake counter.
    fn as_raw_fd(&self) -> RawFd {
        self.changed.as_raw_fd()
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();

        (
            count,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn set_generates_unique_non_zero_ids() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();

        let a = registry.set(None, now, Duration::ZERO, Box::new(|| {}));
        let b = registry.set(None, now, Duration::ZERO, Box::new(|| {}));

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.consume_changed().unwrap());
    }

    #[test]
    fn set_with_existing_id_overwrites() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();

        let id = registry.set(None, now, Duration::ZERO, Box::new(|| {}));
        let later = now + Duration::from_secs(10);
        let same = registry.set(Some(id), later, Duration::ZERO, Box::new(|| {}));

        assert_eq!(id, same);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.expiration(id), Some(later));
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let registry = TimerRegistry::new().unwrap();

        registry.remove(NonZeroU64::new(7).unwrap());

        assert_eq!(registry.len(), 0);
        assert!(!registry.consume_changed().unwrap());
    }

    #[test]
    fn earliest_ignores_inactive() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();

        assert_eq!(registry.earliest_active_expiration(), None);

        let fired = registry.set(None, now, Duration::ZERO, Box::new(|| {}));
        registry.set(None, now + Duration::from_secs(5), Duration::ZERO, Box::new(|| {}));
        registry.set(None, now + Duration::from_secs(2), Duration::ZERO, Box::new(|| {}));

        assert_eq!(registry.earliest_active_expiration(), Some(now));

        registry.dispatch(now);

        assert_eq!(registry.expiration(fired), None);
        assert_eq!(
            registry.earliest_active_expiration(),
            Some(now + Duration::from_secs(2))
        );
    }

    #[test]
    fn one_shot_fires_once() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();
        let (count, callback) = counter();

        let id = registry.set(None, now, Duration::ZERO, callback);

        assert_eq!(registry.dispatch(now), 1);
        assert_eq!(registry.dispatch(now + Duration::from_secs(1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Fired one-shots stay registered but inactive.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.expiration(id), None);
    }

    #[test]
    fn not_yet_expired_does_not_fire() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();
        let (count, callback) = counter();

        registry.set(None, now + Duration::from_secs(60), Duration::ZERO, callback);

        assert_eq!(registry.dispatch(now), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeating_keeps_phase() {
        let registry = TimerRegistry::new().unwrap();
        let start = Instant::now() + Duration::from_secs(60);
        let interval = Duration::from_secs(10);
        let (count, callback) = counter();

        let id = registry.set(None, start, interval, callback);

        // Dispatch late; the next expiration is still on the original grid.
        registry.dispatch(start + Duration::from_secs(3));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.expiration(id), Some(start + interval));
    }

    #[test]
    fn repeating_catches_up_missed_periods() {
        let registry = TimerRegistry::new().unwrap();
        let start = Instant::now();
        let interval = Duration::from_millis(1);
        let (count, callback) = counter();

        registry.set(None, start, interval, callback);

        // Four expirations fall at or before `start + 3ms`.
        let fired = registry.dispatch(start + Duration::from_millis(3));

        assert!(fired >= 4);
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn callback_can_reschedule_itself() {
        let registry = Arc::new(TimerRegistry::new().unwrap());
        let now = Instant::now();
        let slot: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let inner_registry = Arc::downgrade(&registry);
        let inner_slot = slot.clone();
        let inner_count = count.clone();

        let id = registry.set(
            None,
            now,
            Duration::ZERO,
            Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);

                let id = inner_slot.lock().unwrap().unwrap();
                if let Some(registry) = inner_registry.upgrade() {
                    registry.set(
                        Some(id),
                        now + Duration::from_secs(30),
                        Duration::ZERO,
                        Box::new(|| {}),
                    );
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        assert_eq!(registry.dispatch(now), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.expiration(id), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn callback_can_remove_other_timers_mid_sweep() {
        let registry = Arc::new(TimerRegistry::new().unwrap());
        let now = Instant::now();
        let victim: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&registry);
        let inner_victim = victim.clone();
        registry.set(
            None,
            now,
            Duration::ZERO,
            Box::new(move || {
                let id = inner_victim.lock().unwrap().unwrap();
                if let Some(registry) = weak.upgrade() {
                    registry.remove(id);
                }
            }),
        );

        let (count, callback) = counter();
        let id = registry.set(None, now, Duration::ZERO, callback);
        *victim.lock().unwrap() = Some(id);

        let (survivor_count, callback) = counter();
        registry.set(None, now, Duration::ZERO, callback);

        assert_eq!(registry.dispatch(now), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(survivor_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn callback_can_add_timers_mid_sweep() {
        let registry = Arc::new(TimerRegistry::new().unwrap());
        let now = Instant::now();
        let (added_count, added_callback) = counter();
        let added_callback = Arc::new(Mutex::new(Some(added_callback)));

        let weak = Arc::downgrade(&registry);
        registry.set(
            None,
            now,
            Duration::ZERO,
            Box::new(move || {
                let callback = added_callback.lock().unwrap().take();
                if let (Some(registry), Some(callback)) = (weak.upgrade(), callback) {
                    registry.set(None, now, Duration::ZERO, callback);
                }
            }),
        );

        // The added timer is already expired and runs on the follow-up pass.
        assert_eq!(registry.dispatch(now), 2);
        assert_eq!(added_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn callback_can_stop_itself() {
        let registry = Arc::new(TimerRegistry::new().unwrap());
        let start = Instant::now();
        let slot: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&registry);
        let inner_slot = slot.clone();
        let inner_count = count.clone();
        let id = registry.set(
            None,
            start,
            Duration::from_millis(1),
            Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);

                let id = inner_slot.lock().unwrap().unwrap();
                if let Some(registry) = weak.upgrade() {
                    registry.remove(id);
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        registry.dispatch(start + Duration::from_millis(10));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn mutation_from_another_thread() {
        let registry = Arc::new(TimerRegistry::new().unwrap());
        let now = Instant::now();

        let remote = registry.clone();
        let id = std::thread::spawn(move || remote.set(None, now, Duration::ZERO, Box::new(|| {})))
            .join()
            .unwrap();

        assert_eq!(registry.expiration(id), Some(now));
        assert!(registry.consume_changed().unwrap());

        assert_eq!(registry.dispatch(now), 1);
    }

    #[test]
    fn unrepresentable_next_expiration_goes_inactive() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();
        let (count, callback) = counter();

        let id = registry.set(None, now, Duration::MAX, callback);

        assert_eq!(registry.dispatch(now), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.expiration(id), None);
        assert_eq!(registry.earliest_active_expiration(), None);
    }

    #[test]
    fn inactive_set_never_fires() {
        let registry = TimerRegistry::new().unwrap();
        let (count, callback) = counter();

        let id = registry.set(None, None::<Instant>, Duration::ZERO, callback);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.expiration(id), None);
        assert_eq!(registry.dispatch(Instant::now()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_callback_is_removed() {
        let registry = TimerRegistry::new().unwrap();
        let now = Instant::now();

        let id = registry.set(
            None,
            now,
            Duration::from_secs(1),
            Box::new(|| panic!("callback failed")),
        );
        let (count, callback) = counter();
        let other = registry.set(None, now + Duration::from_secs(60), Duration::ZERO, callback);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.dispatch(now);
        }));

        assert!(result.is_err());
        assert_eq!(registry.expiration(id), None);
        assert_eq!(registry.len(), 1);

        // The registry stays usable.
        assert_eq!(registry.dispatch(now + Duration::from_secs(60)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.expiration(other), None);
    }
}
