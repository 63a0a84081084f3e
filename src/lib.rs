//! # mainloop
//!
//! **mainloop** is a single-threaded, readiness-driven event loop with an
//! integrated cross-thread timer subsystem.
//!
//! A [`MainLoop`] blocks on a handful of wake sources and runs the work
//! they announce on the thread that drives it:
//!
//! - **Deferred functions** queued with [`MainLoop::run_in`] or
//!   [`LoopHandle::run_in`], run in FIFO order
//! - **Timers**, one-shot or repeating, scheduled through [`Timer`] handles
//!   from any thread
//! - **Exit requests** from any thread, including from inside a callback
//!
//! Timer handles only hold a weak reference to their loop's timers, so a
//! handle that outlives its loop is inert rather than dangerous.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mainloop::{MainLoop, Timer};
//! use std::time::Duration;
//!
//! let mut main_loop = MainLoop::new()?;
//! let handle = main_loop.handle();
//!
//! let mut tick = Timer::new();
//! tick.start_repeat(&main_loop, Duration::from_millis(100), || println!("tick"));
//!
//! let mut stop = Timer::new();
//! stop.start(&main_loop, Duration::from_secs(1), move || handle.exit(0));
//!
//! let code = main_loop.run()?;
//! assert_eq!(code, 0);
//! # Ok::<(), mainloop::Error>(())
//! ```
//!
//! ## Platform support
//!
//! The loop is built on `epoll`, `eventfd` and `timerfd` and therefore
//! targets Linux.

mod error;
mod main_loop;
mod reactor;
mod timer;

pub use error::{Error, Result};
pub use main_loop::{EXIT_SUCCESS, LoopHandle, MainLoop, MainLoopBuilder};
pub use timer::Timer;
