use std::io;

/// Errors surfaced by the event loop.
///
/// Only failures of the underlying event sources are reported here.
/// Operations on stale timers or unknown ids are silent no-ops and
/// never produce an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A system call backing the multiplexer, a wake counter or the
    /// expiration notifier failed.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A builder option was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Adapter for `map_err` tagging an I/O error with its operation.
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Io { op, source }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
