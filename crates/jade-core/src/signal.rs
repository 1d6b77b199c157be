//! Stop signals and blocking waits for the non-real-time side
//!
//! The real-time bridge never waits. Threads on the synthesis side may, and
//! they do it here: spin briefly with a crossbeam `Backoff`, then sleep in
//! short slices while re-checking their stop signal, so every background
//! task can be shut down deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::utils::Backoff;

/// Sleep slice once spinning is exhausted (well under one frame period)
pub const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Shared cancellation flag owned by a background task and its handle
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owning task to finish
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Block until `ready` returns true or `stop` is raised
///
/// Returns `true` if `ready` succeeded, `false` if stopped first.
pub fn wait_until(stop: &StopSignal, mut ready: impl FnMut() -> bool) -> bool {
    let backoff = Backoff::new();
    loop {
        if ready() {
            return true;
        }
        if stop.is_stopped() {
            return false;
        }
        if backoff.is_completed() {
            thread::sleep(IDLE_SLEEP);
        } else {
            backoff.snooze();
        }
    }
}
