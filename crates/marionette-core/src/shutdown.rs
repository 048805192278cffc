//! Process-wide shutdown gate and the controller-link gauge.
//!
//! Every dispatch site and every periodic tick consults the gate before
//! doing work, so teardown needs no per-task bookkeeping beyond flipping
//! one flag.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared teardown flag. Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGate {
    closed: Arc<AtomicBool>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the gate. Returns true for the first caller only, which makes
    /// teardown idempotent without extra state.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// Count of currently connected controller links. Animations that exist for
/// a controller's benefit stop when the count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct LinkGauge {
    open: Arc<AtomicUsize>,
}

impl LinkGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    pub fn closed(&self) {
        // Saturating: a stray extra close must not wrap the gauge.
        let _ = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn any_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) > 0
    }

    pub fn count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}
