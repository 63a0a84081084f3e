//! One-shot and repeating timers.
//!
//! Timers live in a registry owned by their [`MainLoop`](crate::MainLoop)
//! and are manipulated through [`Timer`] handles from any thread. The loop
//! fires them from its own thread when the expiration notifier wakes it.

mod handle;

pub(crate) mod registry;

#[doc(inline)]
pub use handle::Timer;

pub(crate) use registry::TimerRegistry;
