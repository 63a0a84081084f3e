//! Platform-specific readiness multiplexer.
//!
//! The poller is used by the main loop to:
//! - block until one of its wake sources becomes ready,
//! - report the ready sources in kernel order,
//! - expose a descriptor so the loop can be nested in another reactor.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "linux")]
pub(crate) mod unix;

#[cfg(target_os = "linux")]
pub(crate) use unix as platform;
