//! Frame stamp clock.
//!
//! The stamp is a frame counter advanced once per frame by the terrain
//! registry. Task services and progress callbacks compare a request's stamp
//! against the clock to detect work that nobody has touched for a while.
//!
//! Reads and writes use `Relaxed` ordering: the stamp is a staleness
//! heuristic, never an ordering key.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Default number of frames a request may lag behind the clock before it is
/// considered abandoned.
pub const DEFAULT_STALE_THRESHOLD: i64 = 2;

/// Shared, monotonically increasing frame counter.
///
/// Cloning a clock yields another handle to the same counter.
#[derive(Clone, Debug)]
pub struct StampClock {
    stamp: Arc<AtomicI64>,
    stale_threshold: i64,
}

impl StampClock {
    /// Creates a clock starting at stamp 0.
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_STALE_THRESHOLD)
    }

    /// Creates a clock with a custom staleness threshold.
    pub fn with_threshold(stale_threshold: i64) -> Self {
        Self {
            stamp: Arc::new(AtomicI64::new(0)),
            stale_threshold,
        }
    }

    /// Returns the current stamp.
    pub fn current(&self) -> i64 {
        self.stamp.load(Ordering::Relaxed)
    }

    /// Advances the clock by one frame and returns the new stamp.
    pub fn advance(&self) -> i64 {
        self.stamp.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the staleness threshold in frames.
    pub fn stale_threshold(&self) -> i64 {
        self.stale_threshold
    }

    /// Returns true if a request last touched at `request_stamp` has been
    /// abandoned.
    pub fn is_stale(&self, request_stamp: i64) -> bool {
        self.current() - request_stamp > self.stale_threshold
    }
}

impl Default for StampClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let clock = StampClock::new();
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_clones_share_counter() {
        let clock = StampClock::new();
        let other = clock.clone();
        clock.advance();
        assert_eq!(other.current(), 1);
    }

    #[test]
    fn test_stale_after_more_than_two_frames() {
        let clock = StampClock::new();
        for _ in 0..5 {
            clock.advance();
        }
        assert!(!clock.is_stale(5));
        assert!(!clock.is_stale(3));
        assert!(clock.is_stale(2));
    }
}
