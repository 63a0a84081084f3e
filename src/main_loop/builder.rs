use super::MainLoop;
use crate::error::{Error, Result};

/// Default number of readiness events collected per wait.
///
/// The loop only ever registers four sources.
const DEFAULT_EVENT_CAPACITY: usize = 8;

/// Builder for configuring and creating a [`MainLoop`].
///
/// # Examples
///
/// ```rust,no_run
/// use mainloop::MainLoopBuilder;
///
/// let main_loop = MainLoopBuilder::new()
///     .name("ui")
///     .event_capacity(16)
///     .build()?;
/// # Ok::<(), mainloop::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MainLoopBuilder {
    /// Capacity of the poller's event buffer.
    event_capacity: usize,

    /// Name attached to the loop's log events.
    name: String,
}

impl MainLoopBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            name: String::from("main"),
        }
    }

    /// Sets how many readiness events a single wait can report.
    ///
    /// Zero is rejected by [`build`](Self::build).
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    /// Sets the name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the loop, creating and registering its wake sources.
    pub fn build(self) -> Result<MainLoop> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be > 0"));
        }

        MainLoop::with_config(self.event_capacity, self.name)
    }
}

impl Default for MainLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
