//! Point-in-time copy of terrain counters.

use std::fmt;

/// Snapshot of [`TerrainMetrics`](super::TerrainMetrics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub frames: u64,
    pub requests_submitted: u64,
    pub placeholders_installed: u64,
    pub finals_installed: u64,
    pub retries: u64,
    pub retries_exhausted: u64,
    pub cancellations: u64,
    pub stale_results_discarded: u64,
    pub compiles_dispatched: u64,
    pub compiles_deferred: u64,
    pub geometry_applied: u64,
    pub tiles_registered: u64,
    pub tiles_evicted: u64,
    pub tiles_released: u64,
}

impl TelemetrySnapshot {
    /// Fraction of dispatched compiles whose result reached the scene.
    pub fn compile_efficiency(&self) -> f64 {
        if self.compiles_dispatched == 0 {
            return 0.0;
        }
        self.geometry_applied as f64 / self.compiles_dispatched as f64
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Frames:                {}", self.frames)?;
        writeln!(f, "Requests submitted:    {}", self.requests_submitted)?;
        writeln!(f, "Placeholders:          {}", self.placeholders_installed)?;
        writeln!(f, "Finals:                {}", self.finals_installed)?;
        writeln!(
            f,
            "Retries:               {} ({} exhausted)",
            self.retries, self.retries_exhausted
        )?;
        writeln!(f, "Cancellations:         {}", self.cancellations)?;
        writeln!(f, "Stale results dropped: {}", self.stale_results_discarded)?;
        writeln!(
            f,
            "Compiles:              {} dispatched, {} deferred, {} applied ({:.0}%)",
            self.compiles_dispatched,
            self.compiles_deferred,
            self.geometry_applied,
            self.compile_efficiency() * 100.0
        )?;
        write!(
            f,
            "Tiles:                 {} registered, {} evicted, {} released",
            self.tiles_registered, self.tiles_evicted, self.tiles_released
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_efficiency() {
        let snapshot = TelemetrySnapshot {
            compiles_dispatched: 4,
            geometry_applied: 3,
            ..Default::default()
        };
        assert!((snapshot.compile_efficiency() - 0.75).abs() < 1e-9);
        assert_eq!(TelemetrySnapshot::default().compile_efficiency(), 0.0);
    }

    #[test]
    fn test_display_mentions_counts() {
        let snapshot = TelemetrySnapshot {
            finals_installed: 12,
            ..Default::default()
        };
        assert!(snapshot.to_string().contains("Finals:                12"));
    }
}
