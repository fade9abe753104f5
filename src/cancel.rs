//! One-way cancellation flag shared between a run loop and whoever stops it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

/// Longest single sleep in `CancellationToken::sleep` between flag checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Settable-once stop flag.
///
/// Clones share the same flag. Once cancelled it stays cancelled. Setting it
/// is a single atomic store, so it is safe from a signal-handling thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once `cancel` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` if the
    /// token is cancelled on return.
    pub fn sleep(&self, duration: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !self.is_cancelled() {
                std::thread::sleep(SLEEP_SLICE);
            }
            return true;
        };
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Cancels `token` on SIGINT, SIGTERM or SIGHUP.
///
/// Only one handler can be installed per process.
pub fn install_signal_handler(token: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            info!("Received shutdown signal");
        }
        token.cancel();
    })
}
