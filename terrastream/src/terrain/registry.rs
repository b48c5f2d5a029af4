//! The terrain registry and frame driver.
//!
//! [`TerrainRegistry`] owns everything tiles share: the frame stamp clock,
//! the configuration revision, the task services, the active-tile index and
//! the retirement list of evicted tiles still waiting on their requests.
//!
//! # Frame
//!
//! ```text
//! frame()
//!   ├─ advance stamp
//!   ├─ sync map      new revision? create/drop imagery services,
//!   │                apply revision to every tile
//!   ├─ families      rebuild each tile's parent/neighbor snapshot
//!   ├─ cull pass     rayon, all tiles in parallel
//!   ├─ update pass   sequential, coarse LODs first
//!   └─ reap          release retired tiles with no running requests
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use super::provider::{ServiceKind, ServiceProvider};
use super::{CornerTechnique, TerrainContext, TileFactory, TileTechnique};
use crate::config::TerrainConfig;
use crate::coord::{Relative, TileKey};
use crate::error::TerrainError;
use crate::executor::{StampClock, TaskService};
use crate::map::{LayerUid, Map, MapFrame};
use crate::telemetry::TerrainMetrics;
use crate::tile::{Family, FamilyEntry, Tile};

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one [`TerrainRegistry::frame`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub stamp: i64,
    pub revision: u64,
    /// Active tiles visited.
    pub tiles: usize,
    /// Tiles whose live geometry changed in the update pass.
    pub geometry_changed: usize,
    /// Evicted tiles released this frame.
    pub released: usize,
    /// Evicted tiles still waiting on requests.
    pub retired: usize,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} (rev {}): {} tiles, {} geometry changes, {} released, {} retiring",
            self.stamp, self.revision, self.tiles, self.geometry_changed, self.released, self.retired
        )
    }
}

/// How far the active tiles are from full resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Convergence {
    pub tiles: usize,
    /// Tiles holding elevation at their own LOD.
    pub elevation_final: usize,
    /// Tile/layer pairs expected, over all imagery layers.
    pub imagery_expected: usize,
    /// Tile/layer pairs holding imagery at the tile's own LOD.
    pub imagery_final: usize,
    /// Tiles with compiled geometry in the scene.
    pub with_geometry: usize,
}

impl Convergence {
    /// True when every tile holds final data for every layer.
    pub fn is_complete(&self) -> bool {
        self.elevation_final == self.tiles && self.imagery_final == self.imagery_expected
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`TerrainRegistry`].
pub struct TerrainBuilder {
    map: Arc<Map>,
    factory: Arc<dyn TileFactory>,
    config: TerrainConfig,
    provider: Option<Arc<dyn ServiceProvider>>,
    technique: Option<Arc<dyn TileTechnique>>,
}

impl TerrainBuilder {
    pub fn config(mut self, config: TerrainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ServiceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn technique(mut self, technique: Arc<dyn TileTechnique>) -> Self {
        self.technique = Some(technique);
        self
    }

    /// Builds the registry.
    ///
    /// Without an explicit provider, services are worker pools on the
    /// current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::MissingRuntime`] if no provider was given and
    /// the caller is not inside a tokio runtime.
    pub fn build(self) -> Result<TerrainRegistry, TerrainError> {
        let provider: Arc<dyn ServiceProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(super::WorkerPoolProvider::current(self.config.clone())?),
        };
        let technique = self
            .technique
            .unwrap_or_else(|| Arc::new(CornerTechnique::new(self.config.vertical_scale)));

        let clock = StampClock::with_threshold(self.config.stale_threshold);
        let elevation = provider.create(ServiceKind::Elevation, "elevation", clock.clone());
        let tilegen = provider.create(ServiceKind::TileGen, "tilegen", clock.clone());

        info!(
            mode = %self.config.loading_mode,
            max_attempts = self.config.max_attempts,
            "Terrain registry created"
        );

        Ok(TerrainRegistry {
            config: self.config,
            clock,
            revision: AtomicU64::new(0),
            map: self.map,
            synced_map_revision: Mutex::new(None),
            tiles: DashMap::new(),
            elevation,
            tilegen,
            imagery: DashMap::new(),
            provider,
            factory: self.factory,
            technique,
            retired: Mutex::new(Vec::new()),
            metrics: TerrainMetrics::new(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Terrain-wide state and the per-frame driver.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use terrastream::coord::TileKey;
/// use terrastream::map::{ImageLayerInfo, Map};
/// use terrastream::terrain::{ManualProvider, SyntheticFactory, TerrainRegistry};
///
/// let map = Arc::new(Map::new());
/// map.add_image_layer(ImageLayerInfo::new(1, "imagery"));
///
/// let provider = Arc::new(ManualProvider::new());
/// let terrain = TerrainRegistry::builder(map, Arc::new(SyntheticFactory::new()))
///     .provider(provider.clone())
///     .build()
///     .unwrap();
/// terrain.add_tile(TileKey::root()).unwrap();
///
/// for _ in 0..4 {
///     terrain.frame();
///     provider.run_all();
/// }
/// assert!(terrain.convergence().is_complete());
/// ```
pub struct TerrainRegistry {
    config: TerrainConfig,
    clock: StampClock,
    revision: AtomicU64,
    map: Arc<Map>,
    synced_map_revision: Mutex<Option<u64>>,
    tiles: DashMap<TileKey, Arc<Tile>>,
    elevation: Arc<dyn TaskService>,
    tilegen: Arc<dyn TaskService>,
    imagery: DashMap<LayerUid, Arc<dyn TaskService>>,
    provider: Arc<dyn ServiceProvider>,
    factory: Arc<dyn TileFactory>,
    technique: Arc<dyn TileTechnique>,
    retired: Mutex<Vec<Arc<Tile>>>,
    metrics: TerrainMetrics,
}

impl TerrainRegistry {
    pub fn builder(map: Arc<Map>, factory: Arc<dyn TileFactory>) -> TerrainBuilder {
        TerrainBuilder {
            map,
            factory,
            config: TerrainConfig::default(),
            provider: None,
            technique: None,
        }
    }

    /// Activates a tile.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::InvalidTile`] for keys outside the grid and
    /// [`TerrainError::DuplicateTile`] if the key is already active.
    pub fn add_tile(&self, key: TileKey) -> Result<Arc<Tile>, TerrainError> {
        if !key.is_valid() {
            return Err(TerrainError::InvalidTile(key));
        }
        match self.tiles.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TerrainError::DuplicateTile(key)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let tile = Arc::new(Tile::new(key, self.config.vertical_scale));
                entry.insert(Arc::clone(&tile));
                debug!(tile = %key, "Tile added");
                Ok(tile)
            }
        }
    }

    /// Removes a tile from the active set and cancels its requests.
    ///
    /// The tile is retired, not dropped, until none of its requests is still
    /// running. Returns false if the key was not active.
    pub fn evict_tile(&self, key: &TileKey) -> bool {
        let Some((_, tile)) = self.tiles.remove(key) else {
            return false;
        };
        let canceled = tile.cancel_all_requests();
        self.metrics.tile_evicted();
        debug!(tile = %key, canceled, "Tile evicted");
        self.retired.lock().push(tile);
        true
    }

    /// Active tiles ordered coarse to fine.
    pub fn tiles(&self) -> Vec<Arc<Tile>> {
        let mut tiles: Vec<Arc<Tile>> = self.tiles.iter().map(|e| Arc::clone(e.value())).collect();
        tiles.sort_by_key(|tile| {
            let key = tile.key();
            (key.lod, key.row, key.col)
        });
        tiles
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Evicted tiles not yet released.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn stamp(&self) -> i64 {
        self.clock.current()
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    /// Runs one frame: both traversals over every active tile.
    pub fn frame(&self) -> FrameReport {
        let stamp = self.clock.advance();
        self.metrics.frame_started();

        let frame = self.sync_map();
        let tiles = self.tiles();
        self.refresh_families(&tiles);

        tiles
            .par_iter()
            .for_each(|tile| tile.service_cull_traversal(self, &frame, stamp));

        let geometry_changed = tiles
            .iter()
            .filter(|tile| tile.service_update_traversal(self, &frame, stamp))
            .count();

        let released = self.reap_retired();

        FrameReport {
            stamp,
            revision: self.revision.load(Ordering::Acquire),
            tiles: tiles.len(),
            geometry_changed,
            released,
            retired: self.retired_count(),
        }
    }

    /// Per-layer resolution summary over the active tiles.
    pub fn convergence(&self) -> Convergence {
        let frame = self.map.frame();
        let mut summary = Convergence::default();
        for entry in self.tiles.iter() {
            let tile = entry.value();
            let lod = tile.key().level();
            summary.tiles += 1;
            if !frame.has_elevation() || tile.elevation_lod() >= lod {
                summary.elevation_final += 1;
            }
            for layer in frame.image_layers() {
                summary.imagery_expected += 1;
                if tile.color_lod(layer.uid) >= lod {
                    summary.imagery_final += 1;
                }
            }
            if tile.geometry().is_some() {
                summary.with_geometry += 1;
            }
        }
        summary
    }

    /// Cancels every tile request and stops all services.
    pub fn shutdown(&self) {
        for entry in self.tiles.iter() {
            entry.value().cancel_all_requests();
        }
        self.elevation.shutdown();
        self.tilegen.shutdown();
        for entry in self.imagery.iter() {
            entry.value().shutdown();
        }
        info!(tiles = self.tiles.len(), "Terrain registry shut down");
    }

    // =========================================================================
    // Frame Steps
    // =========================================================================

    /// Applies map changes made since the last frame.
    fn sync_map(&self) -> MapFrame {
        let frame = self.map.frame();
        let mut synced = self.synced_map_revision.lock();
        if *synced == Some(frame.revision()) {
            return frame;
        }

        for layer in frame.image_layers() {
            if !self.imagery.contains_key(&layer.uid) {
                let name = format!("image {}", layer.name);
                let service = self
                    .provider
                    .create(ServiceKind::Imagery, &name, self.clock.clone());
                self.imagery.insert(layer.uid, service);
                info!(uid = layer.uid, layer = %layer.name, "Imagery service created");
            }
        }

        let removed: Vec<LayerUid> = self
            .imagery
            .iter()
            .map(|entry| *entry.key())
            .filter(|uid| !frame.contains_layer(*uid))
            .collect();
        for uid in removed {
            if let Some((_, service)) = self.imagery.remove(&uid) {
                service.shutdown();
                info!(uid, "Imagery service removed");
            }
        }

        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        let updated = self
            .tiles()
            .iter()
            .filter(|tile| tile.apply_configuration_revision(self, &frame, revision))
            .count();
        info!(
            revision,
            map_revision = frame.revision(),
            tiles = updated,
            "Terrain revision applied"
        );

        *synced = Some(frame.revision());
        frame
    }

    fn refresh_families(&self, tiles: &[Arc<Tile>]) {
        for tile in tiles {
            let key = tile.key();
            let mut family = Family::new();
            for relative in Relative::ALL {
                let member = key
                    .neighbor(relative)
                    .filter(|member| *member != key)
                    .and_then(|member| self.tiles.get(&member).map(|e| Arc::clone(e.value())));
                if let Some(member) = member {
                    let (elevation_lod, image_lods) = member.resolution();
                    family.set(relative, FamilyEntry::present(elevation_lod, image_lods));
                }
            }
            tile.set_family(family);
        }
    }

    fn reap_retired(&self) -> usize {
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|tile| !tile.requests_quiescent());
        let released = before - retired.len();
        if released > 0 {
            self.metrics.tiles_released(released);
            debug!(released, remaining = retired.len(), "Released retired tiles");
        }
        released
    }
}

impl TerrainContext for TerrainRegistry {
    fn config(&self) -> &TerrainConfig {
        &self.config
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn tile(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.tiles.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn elevation_service(&self) -> Arc<dyn TaskService> {
        Arc::clone(&self.elevation)
    }

    fn imagery_service(&self, uid: LayerUid) -> Option<Arc<dyn TaskService>> {
        self.imagery.get(&uid).map(|entry| Arc::clone(entry.value()))
    }

    fn tilegen_service(&self) -> Arc<dyn TaskService> {
        Arc::clone(&self.tilegen)
    }

    fn factory(&self) -> Arc<dyn TileFactory> {
        Arc::clone(&self.factory)
    }

    fn technique(&self) -> Arc<dyn TileTechnique> {
        Arc::clone(&self.technique)
    }

    fn metrics(&self) -> &TerrainMetrics {
        &self.metrics
    }

    fn register_traversed(&self, key: &TileKey) {
        self.metrics.tile_registered();
        debug!(tile = %key, "Tile registered with terrain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::ImageLayerInfo;
    use crate::terrain::{ManualProvider, SyntheticFactory};

    fn manual_terrain(map: Arc<Map>) -> (TerrainRegistry, Arc<ManualProvider>) {
        let provider = Arc::new(ManualProvider::new());
        let terrain = TerrainRegistry::builder(map, Arc::new(SyntheticFactory::new()))
            .provider(provider.clone())
            .build()
            .unwrap();
        (terrain, provider)
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let result =
            TerrainRegistry::builder(Arc::new(Map::new()), Arc::new(SyntheticFactory::new())).build();
        assert!(matches!(result, Err(TerrainError::MissingRuntime(_))));
    }

    #[test]
    fn test_add_tile_rejects_duplicates_and_invalid_keys() {
        let (terrain, _) = manual_terrain(Arc::new(Map::new()));
        assert!(terrain.add_tile(TileKey::root()).is_ok());
        assert!(matches!(
            terrain.add_tile(TileKey::root()),
            Err(TerrainError::DuplicateTile(_))
        ));
        assert!(matches!(
            terrain.add_tile(TileKey::new(4, 0, 1)),
            Err(TerrainError::InvalidTile(_))
        ));
        assert_eq!(terrain.tile_count(), 1);
    }

    #[test]
    fn test_frame_advances_stamp() {
        let (terrain, _) = manual_terrain(Arc::new(Map::new()));
        assert_eq!(terrain.frame().stamp, 1);
        assert_eq!(terrain.frame().stamp, 2);
        assert_eq!(terrain.stamp(), 2);
        assert_eq!(terrain.metrics().snapshot().frames, 2);
    }

    #[test]
    fn test_layer_services_follow_map() {
        let map = Arc::new(Map::new());
        map.add_image_layer(ImageLayerInfo::new(1, "base"));
        let (terrain, _) = manual_terrain(Arc::clone(&map));

        terrain.frame();
        assert!(terrain.imagery_service(1).is_some());
        let revision = TerrainContext::revision(&terrain);

        map.add_image_layer(ImageLayerInfo::new(2, "overlay"));
        map.remove_image_layer(1);
        terrain.frame();
        assert!(terrain.imagery_service(1).is_none());
        assert!(terrain.imagery_service(2).is_some());
        assert_eq!(TerrainContext::revision(&terrain), revision + 1);

        // Unchanged map leaves the revision alone
        terrain.frame();
        assert_eq!(TerrainContext::revision(&terrain), revision + 1);
    }

    #[test]
    fn test_families_skip_self_and_missing_members() {
        let (terrain, _) = manual_terrain(Arc::new(Map::new()));
        let root = terrain.add_tile(TileKey::root()).unwrap();
        let child = terrain.add_tile(TileKey::new(0, 0, 1)).unwrap();
        terrain.frame();

        // LOD 0 wraps onto itself east and west
        assert!(!root.family().get(Relative::West).expected);
        assert!(!root.family().parent().expected);

        let family = child.family();
        assert!(family.parent().expected);
        assert!(!family.get(Relative::East).expected);
        assert!(!family.get(Relative::North).expected);
    }

    #[test]
    fn test_root_converges() {
        let map = Arc::new(Map::new());
        map.add_image_layer(ImageLayerInfo::new(1, "base"));
        let (terrain, provider) = manual_terrain(map);
        terrain.add_tile(TileKey::root()).unwrap();

        for _ in 0..4 {
            terrain.frame();
            provider.run_all();
        }
        let convergence = terrain.convergence();
        assert!(convergence.is_complete(), "{:?}", convergence);
        assert_eq!(convergence.with_geometry, 1);
    }

    #[test]
    fn test_evicted_tile_released_once_quiescent() {
        let (terrain, provider) = manual_terrain(Arc::new(Map::new()));
        terrain.add_tile(TileKey::root()).unwrap();
        terrain.frame();
        assert!(provider.pending() > 0);

        assert!(terrain.evict_tile(&TileKey::root()));
        assert!(!terrain.evict_tile(&TileKey::root()));
        assert_eq!(terrain.retired_count(), 1);

        // Queued requests are still marked running until a service drains them
        let report = terrain.frame();
        assert_eq!(report.released, 0);

        provider.run_all();
        let report = terrain.frame();
        assert_eq!(report.released, 1);
        assert_eq!(terrain.retired_count(), 0);

        let snapshot = terrain.metrics().snapshot();
        assert_eq!(snapshot.tiles_evicted, 1);
        assert_eq!(snapshot.tiles_released, 1);
    }
}
