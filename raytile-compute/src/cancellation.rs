//! Cooperative stop signal between a worker handle and its thread.
//!
//! A unit call that is already running is never interrupted; the worker loop
//! checks the signal before each command and between incremental passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait CancellationChecker: Clone + Send {
    /// True once the controller no longer wants replies from this worker.
    fn is_cancelled(&self) -> bool;
}

/// For workers that are only stopped by `Terminate` or a closed inbox.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancellationChecker for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// One-way latch shared by a handle and its worker thread. Once raised it
/// stays raised; a restarted worker gets a fresh flag.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl CancellationChecker for StopFlag {
    fn is_cancelled(&self) -> bool {
        self.is_raised()
    }
}
