//! Terrain telemetry for observability.
//!
//! Lock-free atomic counters recorded by tiles and the registry, copied into
//! a [`TelemetrySnapshot`] for display.
//!
//! # Architecture
//!
//! ```text
//! Tiles / Registry ─────► TerrainMetrics ─────► TelemetrySnapshot ─────► CLI
//!                         (atomic counters)     (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```
//! use terrastream::telemetry::TerrainMetrics;
//!
//! let metrics = TerrainMetrics::new();
//! metrics.request_submitted();
//! metrics.final_installed();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.requests_submitted, 1);
//! assert_eq!(snapshot.finals_installed, 1);
//! ```

mod metrics;
mod snapshot;

pub use metrics::TerrainMetrics;
pub use snapshot::TelemetrySnapshot;
