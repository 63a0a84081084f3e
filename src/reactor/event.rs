/// One of the four wake sources a [`MainLoop`](crate::MainLoop) waits on.
///
/// The discriminant doubles as the epoll token the source is registered
/// with, so events reported by the poller map back without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// `exit()` was requested.
    Exit = 0,

    /// Deferred functions were queued with `run_in()`.
    Deferred = 1,

    /// The expiration notifier reached its armed deadline.
    TimerExpired = 2,

    /// A timer was added, rescheduled or removed.
    TimerChanged = 3,
}

impl Source {
    /// All sources, in registration order.
    pub(crate) const ALL: [Source; 4] = [
        Source::Exit,
        Source::Deferred,
        Source::TimerExpired,
        Source::TimerChanged,
    ];

    /// Token stored in the epoll registration.
    pub(crate) fn token(self) -> u64 {
        self as u64
    }

    /// Maps a token reported by the poller back to its source.
    pub(crate) fn from_token(token: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.token() == token)
    }
}
