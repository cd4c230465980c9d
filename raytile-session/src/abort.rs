//! Cross-thread abort switch.
//!
//! The handle side raises a flag and drops a token into a one-slot channel;
//! the controller blocks on that channel alongside worker traffic, so an
//! abort wakes it without polling.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Requests that the current render stop. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
        // A full slot already carries a wakeup.
        let _ = self.wake.try_send(());
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Controller-side view of the abort switch.
#[derive(Clone)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    wake: Receiver<()>,
    // Keeps the wake channel connected after every handle is dropped.
    _keepalive: Sender<()>,
}

impl AbortSignal {
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn wake(&self) -> &Receiver<()> {
        &self.wake
    }

    /// Lower the flag and discard pending wakeups before a new session.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
        while self.wake.try_recv().is_ok() {}
    }
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let flag = Arc::new(AtomicBool::new(false));
    let (wake_tx, wake_rx) = bounded(1);
    (
        AbortHandle {
            flag: Arc::clone(&flag),
            wake: wake_tx.clone(),
        },
        AbortSignal {
            flag,
            wake: wake_rx,
            _keepalive: wake_tx,
        },
    )
}
