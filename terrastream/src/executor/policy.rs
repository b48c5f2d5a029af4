//! Scheduling and retry policy for tile requests.
//!
//! # Policy Types
//!
//! - [`LoadingMode`]: How imagery requests are prioritized across tiles
//! - [`RetryPolicy`]: How many times a final-LOD request may fail before the
//!   tile stops refining that layer
//!
//! # Priorities
//!
//! Priorities are plain `f32` values, higher first. Elevation uses the tile's
//! LOD. Imagery sits [`PRIORITY_IMAGE_OFFSET`] above elevation of comparable
//! LOD, with the sign of the LOD term chosen by the loading mode:
//!
//! ```text
//! sequential:  -lod + 0.1   (coarse tiles first, global coarse-to-fine fill)
//! preemptive:   lod + 0.1   (fine tiles first, race to detail)
//! ```

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Priority Constants
// =============================================================================

/// Priority offset of imagery relative to elevation.
pub const PRIORITY_IMAGE_OFFSET: f32 = 0.1;

/// Default number of attempts allowed before a final-LOD request gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// Loading Mode
// =============================================================================

/// Global imagery loading strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoadingMode {
    /// Refine one LOD at a time using placeholders derived from parents.
    /// Lower-LOD tiles are fetched first system-wide.
    #[default]
    Sequential,
    /// Fetch final imagery immediately, highest LOD first.
    Preemptive,
}

impl fmt::Display for LoadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadingMode::Sequential => write!(f, "sequential"),
            LoadingMode::Preemptive => write!(f, "preemptive"),
        }
    }
}

impl FromStr for LoadingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(LoadingMode::Sequential),
            "preemptive" => Ok(LoadingMode::Preemptive),
            other => Err(format!(
                "unknown loading mode '{}', expected 'sequential' or 'preemptive'",
                other
            )),
        }
    }
}

/// Priority of an elevation request for a tile at `lod`.
pub fn elevation_priority(lod: u8) -> f32 {
    lod as f32
}

/// Priority of an imagery request for a tile at `lod`.
pub fn imagery_priority(mode: LoadingMode, lod: u8) -> f32 {
    match mode {
        LoadingMode::Sequential => -(lod as f32) + PRIORITY_IMAGE_OFFSET,
        LoadingMode::Preemptive => lod as f32 + PRIORITY_IMAGE_OFFSET,
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// How many times a final-LOD request may come back empty.
///
/// There is no backoff: a failed request is reset and resubmitted on the next
/// pass. The stamp-staleness check already bounds how long abandoned work
/// occupies a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true once `attempts` failed executions exceed the cap.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_prefers_coarse_tiles() {
        let coarse = imagery_priority(LoadingMode::Sequential, 2);
        let fine = imagery_priority(LoadingMode::Sequential, 8);
        assert!(coarse > fine);
    }

    #[test]
    fn test_preemptive_prefers_fine_tiles() {
        let coarse = imagery_priority(LoadingMode::Preemptive, 2);
        let fine = imagery_priority(LoadingMode::Preemptive, 8);
        assert!(fine > coarse);
    }

    #[test]
    fn test_imagery_offset_above_elevation() {
        let lod = 6;
        let imagery = imagery_priority(LoadingMode::Preemptive, lod);
        assert!((imagery - elevation_priority(lod) - PRIORITY_IMAGE_OFFSET).abs() < 1e-6);
    }

    #[test]
    fn test_loading_mode_parse() {
        assert_eq!("Sequential".parse::<LoadingMode>(), Ok(LoadingMode::Sequential));
        assert_eq!(" preemptive ".parse::<LoadingMode>(), Ok(LoadingMode::Preemptive));
        assert!("eager".parse::<LoadingMode>().is_err());
    }

    #[test]
    fn test_retry_policy_exhaustion() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
