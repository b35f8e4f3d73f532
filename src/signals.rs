//! Graceful shutdown on SIGINT/SIGTERM/SIGHUP, grounded on shpool's
//! `daemon/signals.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Spawn a thread that waits for a termination signal and then flips
/// `shutdown` to `true`. The accept loop in `server::serve` polls this flag
/// between connections.
pub fn install(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).context("registering signal handlers")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                log::info!(target: "Hub", "received signal {}, shutting down", sig);
                shutdown.store(true, Ordering::SeqCst);
            }
        })
        .context("spawning signal-handling thread")?;

    Ok(())
}
