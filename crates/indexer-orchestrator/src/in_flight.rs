//! In-flight tracking for collaborator calls.
//!
//! A job must never have two executor calls outstanding at once. The guard
//! makes that an explicit, checkable flag rather than a consequence of how
//! the loop happens to schedule its retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tracks whether a call for one job is currently outstanding.
///
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a call as outstanding.
    ///
    /// Returns `None` if another call already holds the guard.
    pub fn try_acquire(&self) -> Option<InFlight> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight {
                flag: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// RAII token for an outstanding call; releases the flag on drop.
///
/// Released even if the task holding it is aborted mid-call.
#[derive(Debug)]
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
