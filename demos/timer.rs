//! Example: a repeating timer, a deferred function and a timed exit.
//!
//! Run with `RUST_LOG=mainloop=trace` to watch the loop dispatch.

use mainloop::{EXIT_SUCCESS, MainLoop, Timer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> mainloop::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    let mut main_loop = MainLoop::builder().name("demo").build()?;
    let handle = main_loop.handle();

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();

    let mut tick = Timer::new();
    tick.start_repeat(&main_loop, Duration::from_millis(250), move || {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        println!("tick {n}");
    });

    main_loop.run_in(|| println!("Waiting for 1 second..."));

    let mut stop = Timer::new();
    stop.start(&main_loop, Duration::from_secs(1), move || {
        let exit = handle.clone();
        handle.run_in(move || exit.exit(EXIT_SUCCESS));
    });

    let code = main_loop.run()?;
    println!("Done after {} ticks (exit code {code})", ticks.load(Ordering::Relaxed));

    Ok(())
}
