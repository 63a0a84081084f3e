//! Wake sources and the readiness multiplexer.
//!
//! This module wraps the OS primitives the main loop blocks on:
//! - the poller that waits across all sources,
//! - wake counters signalled from any thread,
//! - the expiration notifier armed for the earliest timer.
//!
//! Nothing here knows about timers or callbacks; the main loop
//! interprets which source became ready.

pub(crate) mod event;
pub(crate) mod notifier;
pub(crate) mod poller;
pub(crate) mod wake;

pub(crate) use event::Source;
pub(crate) use notifier::ExpirationNotifier;
pub(crate) use poller::Poller;
pub(crate) use wake::WakeCounter;
