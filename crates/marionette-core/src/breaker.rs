//! Per-world circuit breaker over bounded synchronous reads.
//!
//! Each world context gets its own breaker counting *consecutive* dispatch
//! timeouts. Once the count exceeds the trip threshold, further synchronous
//! reads fail fast instead of stacking more blocked callers onto a world
//! that has stopped draining its queue. A single successful dispatch arms
//! the world again.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_timeouts: AtomicU32,
    trip_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(trip_threshold: u32) -> Self {
        Self {
            consecutive_timeouts: AtomicU32::new(0),
            trip_threshold,
        }
    }

    /// Whether a new synchronous read may be attempted.
    pub fn allows_read(&self) -> bool {
        !self.is_tripped()
    }

    /// Strictly more timeouts than the threshold opens the breaker, so a
    /// threshold of 10 tolerates exactly 10 consecutive misses.
    pub fn is_tripped(&self) -> bool {
        self.consecutive_timeouts.load(Ordering::SeqCst) > self.trip_threshold
    }

    /// Record a completed dispatch. Any success closes the breaker.
    pub fn record_success(&self) {
        self.consecutive_timeouts.store(0, Ordering::SeqCst);
    }

    /// Record a timed-out dispatch. Returns the new consecutive count.
    pub fn record_timeout(&self) -> u32 {
        self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::SeqCst)
    }
}
