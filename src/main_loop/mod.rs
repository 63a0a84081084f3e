//! The event loop.
//!
//! [`MainLoop`] owns the poller, the timer registry and the deferred
//! function queue, and drives the wait/dispatch cycle on one thread.
//! [`LoopHandle`] is its thread-safe front door; [`MainLoopBuilder`]
//! configures it.

mod core;

pub(crate) mod builder;
pub(crate) mod deferred;
pub(crate) mod handle;

pub use self::core::MainLoop;
pub use builder::MainLoopBuilder;
pub use handle::{EXIT_SUCCESS, LoopHandle};
