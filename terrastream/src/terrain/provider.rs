//! Task service construction.
//!
//! The registry never builds services itself; it asks a [`ServiceProvider`]
//! for one whenever a queue is needed (elevation and tilegen at startup, one
//! per imagery layer as layers join the map). Swapping the provider switches
//! between threaded execution and deterministic stepping without touching the
//! registry.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::TerrainConfig;
use crate::error::TerrainError;
use crate::executor::{ManualTaskService, StampClock, TaskService, WorkerPoolService};

/// What a service will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Elevation,
    Imagery,
    TileGen,
}

impl ServiceKind {
    /// Worker count the config assigns to this kind.
    pub fn workers(self, config: &TerrainConfig) -> usize {
        match self {
            ServiceKind::Elevation => config.elevation_workers,
            ServiceKind::Imagery => config.imagery_workers,
            ServiceKind::TileGen => config.tilegen_workers,
        }
    }
}

/// Creates task services for a terrain.
pub trait ServiceProvider: Send + Sync {
    fn create(&self, kind: ServiceKind, name: &str, clock: StampClock) -> Arc<dyn TaskService>;
}

// =============================================================================
// Worker Pool Provider
// =============================================================================

/// Builds [`WorkerPoolService`]s on a tokio runtime.
pub struct WorkerPoolProvider {
    handle: Handle,
    config: TerrainConfig,
}

impl WorkerPoolProvider {
    pub fn new(handle: Handle, config: TerrainConfig) -> Self {
        Self { handle, config }
    }

    /// Uses the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::MissingRuntime`] outside a tokio runtime.
    pub fn current(config: TerrainConfig) -> Result<Self, TerrainError> {
        let handle =
            Handle::try_current().map_err(|e| TerrainError::MissingRuntime(e.to_string()))?;
        Ok(Self::new(handle, config))
    }
}

impl ServiceProvider for WorkerPoolProvider {
    fn create(&self, kind: ServiceKind, name: &str, clock: StampClock) -> Arc<dyn TaskService> {
        WorkerPoolService::spawn(name, clock, kind.workers(&self.config), &self.handle)
    }
}

// =============================================================================
// Manual Provider
// =============================================================================

/// Builds [`ManualTaskService`]s and keeps a handle to each so the caller can
/// pump them between frames.
#[derive(Default)]
pub struct ManualProvider {
    services: Mutex<Vec<Arc<ManualTaskService>>>,
}

impl ManualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every queued request on every service created so far, on the
    /// calling thread. Returns the number executed.
    pub fn run_all(&self) -> usize {
        let services: Vec<_> = self.services.lock().clone();
        services.iter().map(|service| service.run_pending()).sum()
    }

    /// Requests waiting across all services.
    pub fn pending(&self) -> usize {
        self.services.lock().iter().map(|s| s.pending()).sum()
    }

    /// Services created so far, in creation order.
    pub fn services(&self) -> Vec<Arc<ManualTaskService>> {
        self.services.lock().clone()
    }
}

impl ServiceProvider for ManualProvider {
    fn create(&self, _kind: ServiceKind, name: &str, clock: StampClock) -> Arc<dyn TaskService> {
        let service = Arc::new(ManualTaskService::new(name, clock));
        self.services.lock().push(Arc::clone(&service));
        service
    }
}
