//! Shutdown on SIGINT/SIGTERM/SIGQUIT
//!
//! The first signal stops the watch loop; the coordinator then drops and
//! settles whatever emission is still pending. A second signal exits at once
//! with 128 + signal number, for runs stuck inside Python.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::warn;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Listen for termination signals on a detached thread.
///
/// # Errors
/// Registering the handlers failed.
pub fn install_signal_handlers() -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if request_shutdown() {
                warn!(signal = sig, "second signal, exiting now");
                std::process::exit(128 + sig);
            }
            warn!(signal = sig, "stopping watch, pending runs will settle");
        }
    });

    Ok(())
}

/// Mark shutdown as requested; returns whether it already was
pub fn request_shutdown() -> bool {
    SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst)
}

#[inline]
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_sticky() {
        assert!(!shutdown_requested());
        assert!(!request_shutdown());
        assert!(shutdown_requested());
        assert!(request_shutdown());
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}
