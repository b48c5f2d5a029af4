//! Atomic counters for the reconciliation engine.

use std::sync::atomic::{AtomicU64, Ordering};

use super::TelemetrySnapshot;

/// Counters shared by every tile of a terrain.
///
/// All operations are `Relaxed`; counts are for reporting only.
#[derive(Debug, Default)]
pub struct TerrainMetrics {
    frames: AtomicU64,
    requests_submitted: AtomicU64,
    placeholders_installed: AtomicU64,
    finals_installed: AtomicU64,
    retries: AtomicU64,
    retries_exhausted: AtomicU64,
    cancellations: AtomicU64,
    stale_results_discarded: AtomicU64,
    compiles_dispatched: AtomicU64,
    compiles_deferred: AtomicU64,
    geometry_applied: AtomicU64,
    tiles_registered: AtomicU64,
    tiles_evicted: AtomicU64,
    tiles_released: AtomicU64,
}

impl TerrainMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_started(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn placeholder_installed(&self) {
        self.placeholders_installed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn final_installed(&self) {
        self.finals_installed.fetch_add(1, Ordering::Relaxed);
    }

    /// A final request came back empty and will be resubmitted.
    pub fn retry_scheduled(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A final request hit the retry cap and the tile relabelled its data.
    pub fn retry_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_canceled(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// A result was dropped because its layer left the map.
    pub fn stale_result_discarded(&self) {
        self.stale_results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compile_dispatched(&self) {
        self.compiles_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A compile result was held back because newer updates were pending.
    pub fn compile_deferred(&self) {
        self.compiles_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn geometry_applied(&self) {
        self.geometry_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_registered(&self) {
        self.tiles_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_evicted(&self) {
        self.tiles_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tiles_released(&self, count: usize) {
        self.tiles_released.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            placeholders_installed: self.placeholders_installed.load(Ordering::Relaxed),
            finals_installed: self.finals_installed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            stale_results_discarded: self.stale_results_discarded.load(Ordering::Relaxed),
            compiles_dispatched: self.compiles_dispatched.load(Ordering::Relaxed),
            compiles_deferred: self.compiles_deferred.load(Ordering::Relaxed),
            geometry_applied: self.geometry_applied.load(Ordering::Relaxed),
            tiles_registered: self.tiles_registered.load(Ordering::Relaxed),
            tiles_evicted: self.tiles_evicted.load(Ordering::Relaxed),
            tiles_released: self.tiles_released.load(Ordering::Relaxed),
        }
    }
}
