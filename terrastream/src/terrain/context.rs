//! What a tile needs from its terrain.

use std::sync::Arc;

use super::{TileFactory, TileTechnique};
use crate::config::TerrainConfig;
use crate::coord::TileKey;
use crate::executor::TaskService;
use crate::map::LayerUid;
use crate::telemetry::TerrainMetrics;
use crate::tile::Tile;

/// Terrain-wide state passed explicitly into every tile call.
///
/// Implemented by [`TerrainRegistry`](super::TerrainRegistry). Tile lookup
/// goes through a concurrent index, so callers never need to hold a registry
/// lock.
pub trait TerrainContext: Send + Sync {
    fn config(&self) -> &TerrainConfig;

    /// Current terrain configuration revision.
    fn revision(&self) -> u64;

    /// Looks up an active tile.
    fn tile(&self, key: &TileKey) -> Option<Arc<Tile>>;

    fn elevation_service(&self) -> Arc<dyn TaskService>;

    /// The service dedicated to an imagery layer, if the layer is known.
    fn imagery_service(&self, uid: LayerUid) -> Option<Arc<dyn TaskService>>;

    fn tilegen_service(&self) -> Arc<dyn TaskService>;

    fn factory(&self) -> Arc<dyn TileFactory>;

    fn technique(&self) -> Arc<dyn TileTechnique>;

    fn metrics(&self) -> &TerrainMetrics;

    /// Called once per tile, on its first update traversal.
    fn register_traversed(&self, key: &TileKey);
}
