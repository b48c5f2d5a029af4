//! Integration tests for per-tile LOD reconciliation.
//!
//! These tests drive a [`TerrainRegistry`] frame by frame with manually
//! pumped task services, so every request runs at a known point:
//! - monotonic refinement and convergence across a quadtree
//! - cancellation, retry caps and deleted layers
//! - coalescing of geometry updates
//!
//! Run with: `cargo test --test reconciliation_integration`

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;

use terrastream::config::TerrainConfig;
use terrastream::coord::{Relative, TileKey};
use terrastream::executor::{LoadingMode, ProgressCallback, TaskService};
use terrastream::map::{ImageLayerInfo, LayerUid, Map};
use terrastream::terrain::{
    ManualProvider, SyntheticFactory, TerrainContext, TerrainRegistry, TileFactory,
};
use terrastream::tile::{HeightField, TileUpdate, NO_LOD};

// ============================================================================
// Helper Functions
// ============================================================================

struct Harness {
    map: Arc<Map>,
    provider: Arc<ManualProvider>,
    terrain: TerrainRegistry,
}

impl Harness {
    fn new(layers: &[LayerUid], factory: Arc<dyn TileFactory>, config: TerrainConfig) -> Self {
        let map = Arc::new(Map::new());
        for uid in layers {
            map.add_image_layer(ImageLayerInfo::new(*uid, format!("layer-{}", uid)));
        }
        let provider = Arc::new(ManualProvider::new());
        let terrain = TerrainRegistry::builder(Arc::clone(&map), factory)
            .config(config)
            .provider(provider.clone())
            .build()
            .unwrap();
        Self {
            map,
            provider,
            terrain,
        }
    }

    fn with_quadtree(self, depth: u8) -> Self {
        for lod in 0..=depth {
            let n = 1u32 << lod;
            for row in 0..n {
                for col in 0..n {
                    self.terrain.add_tile(TileKey::new(row, col, lod)).unwrap();
                }
            }
        }
        self
    }

    /// One frame followed by running every queued request.
    fn step(&self) {
        self.terrain.frame();
        self.provider.run_all();
    }

    fn steps(&self, frames: usize) {
        for _ in 0..frames {
            self.step();
        }
    }

    /// Snapshot of every (tile, layer) LOD. Elevation is keyed as `None`.
    fn lods(&self) -> HashMap<(TileKey, Option<LayerUid>), i32> {
        let mut lods = HashMap::new();
        for tile in self.terrain.tiles() {
            let (elevation, images) = tile.resolution();
            lods.insert((tile.key(), None), elevation);
            for (uid, lod) in images {
                lods.insert((tile.key(), Some(uid)), lod);
            }
        }
        lods
    }
}

/// Synthetic content, except imagery for tiles at or below `fail_from_lod`
/// never arrives.
struct FailingFineImagery {
    inner: SyntheticFactory,
    fail_from_lod: u8,
}

impl TileFactory for FailingFineImagery {
    fn create_image(
        &self,
        key: &TileKey,
        layer: &ImageLayerInfo,
        progress: &dyn ProgressCallback,
    ) -> Option<RgbaImage> {
        let image = self.inner.create_image(key, layer, progress)?;
        (key.lod < self.fail_from_lod).then_some(image)
    }

    fn create_heightfield(&self, key: &TileKey, progress: &dyn ProgressCallback) -> Option<HeightField> {
        self.inner.create_heightfield(key, progress)
    }
}

fn synthetic() -> Arc<SyntheticFactory> {
    Arc::new(SyntheticFactory::new())
}

// ============================================================================
// Convergence
// ============================================================================

#[test]
fn test_sequential_quadtree_converges() {
    let harness = Harness::new(&[1, 2], synthetic(), TerrainConfig::default()).with_quadtree(3);
    harness.steps(60);

    let convergence = harness.terrain.convergence();
    assert!(convergence.is_complete(), "{:?}", convergence);
    assert_eq!(convergence.with_geometry, convergence.tiles);
}

#[test]
fn test_preemptive_quadtree_converges() {
    let config = TerrainConfig::default().with_loading_mode(LoadingMode::Preemptive);
    let harness = Harness::new(&[1], synthetic(), config).with_quadtree(3);
    harness.steps(60);

    assert!(harness.terrain.convergence().is_complete());
}

#[test]
fn test_neighbors_end_within_one_lod() {
    let harness = Harness::new(&[1], synthetic(), TerrainConfig::default()).with_quadtree(2);
    harness.steps(40);

    let lods = harness.lods();
    for tile in harness.terrain.tiles() {
        let key = tile.key();
        for relative in [Relative::West, Relative::North, Relative::East, Relative::South] {
            let Some(neighbor) = key.neighbor(relative) else {
                continue;
            };
            for layer in [None, Some(1)] {
                let a = lods[&(key, layer)];
                let b = lods[&(neighbor, layer)];
                assert!((a - b).abs() <= 1, "{} vs {} on {:?}: {} / {}", key, neighbor, layer, a, b);
            }
        }
    }
}

#[test]
fn test_refinement_is_monotonic_and_bounded() {
    let factory = Arc::new(SyntheticFactory::new().with_failure_rate(0.3));
    let harness = Harness::new(&[1, 2], factory, TerrainConfig::default()).with_quadtree(2);

    let mut previous = harness.lods();
    for _ in 0..50 {
        harness.step();
        let current = harness.lods();
        for ((key, layer), lod) in &current {
            assert!(*lod <= key.level(), "{} {:?} exceeds its own LOD", key, layer);
            let before = previous.get(&(*key, *layer)).copied().unwrap_or(NO_LOD);
            assert!(*lod >= before, "{} {:?} went from {} to {}", key, layer, before, lod);
        }
        previous = current;
    }
}

#[test]
fn test_children_start_from_placeholders() {
    let harness = Harness::new(&[1], synthetic(), TerrainConfig::default()).with_quadtree(1);
    harness.steps(3);

    let child = harness.terrain.tile(&TileKey::new(1, 1, 1)).unwrap();
    assert_eq!(child.color_lod(1), 0, "imagery adopted from the parent");
    assert!(harness.terrain.metrics().snapshot().placeholders_installed >= 4);
}

#[test]
fn test_preemptive_skips_imagery_placeholders() {
    let config = TerrainConfig::default().with_loading_mode(LoadingMode::Preemptive);
    let harness = Harness::new(&[1], synthetic(), config).with_quadtree(1);
    harness.terrain.frame();

    // Imagery service is created third, after elevation and tilegen
    let imagery = &harness.provider.services()[2];
    assert_eq!(imagery.pending(), 5, "every tile asks for final imagery at once");
}

// ============================================================================
// Cancellation and Deleted Layers
// ============================================================================

#[test]
fn test_canceled_request_is_reset_and_resubmitted() {
    let harness = Harness::new(&[], synthetic(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.terrain.frame();
    let elevation = &harness.provider.services()[0];
    assert_eq!(elevation.cancel_pending(), 1);

    harness.step();
    assert_eq!(root.elevation_lod(), NO_LOD, "canceled work never reaches the tile");
    assert_eq!(harness.terrain.metrics().snapshot().cancellations, 1);

    harness.steps(2);
    assert_eq!(root.elevation_lod(), 0);
    assert_eq!(harness.terrain.metrics().snapshot().finals_installed, 1);
}

#[test]
fn test_result_for_removed_layer_is_discarded() {
    let factory = synthetic();
    let harness = Harness::new(&[1, 2], factory.clone(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.terrain.frame();
    harness.map.remove_image_layer(2);
    harness.provider.run_all();
    assert_eq!(factory.image_attempts(&TileKey::root(), 2), 1, "result was produced");

    harness.steps(3);
    assert!(root.layers().color(2).is_none());
    assert_eq!(root.color_lod(1), 0);
    let snapshot = harness.terrain.metrics().snapshot();
    assert_eq!(snapshot.stale_results_discarded, 1);

    let geometry = root.geometry().unwrap();
    assert!(!geometry.image_lods.contains_key(&2));
}

#[test]
fn test_removed_layer_records_are_pruned() {
    let harness = Harness::new(&[1, 2], synthetic(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();
    harness.steps(4);
    assert_eq!(root.color_lod(2), 0);

    let revision = root.tile_revision();
    harness.map.remove_image_layer(2);
    harness.steps(3);

    assert!(root.layers().color(2).is_none());
    assert!(root.tile_revision() > revision);
    assert!(harness.terrain.convergence().is_complete());
}

// ============================================================================
// Retry Cap
// ============================================================================

#[test]
fn test_imagery_retry_cap_recommits_placeholder_once() {
    let factory = Arc::new(FailingFineImagery {
        inner: SyntheticFactory::new(),
        fail_from_lod: 1,
    });
    let harness = Harness::new(&[1], factory.clone(), TerrainConfig::default());
    harness.terrain.add_tile(TileKey::root()).unwrap();
    let child = harness.terrain.add_tile(TileKey::new(0, 0, 1)).unwrap();

    harness.steps(40);

    assert_eq!(child.color_lod(1), 1, "placeholder relabelled as final");
    assert_eq!(factory.inner.image_attempts(&child.key(), 1), 4);
    let snapshot = harness.terrain.metrics().snapshot();
    assert_eq!(snapshot.retries, 3);
    assert_eq!(snapshot.retries_exhausted, 1);

    harness.steps(10);
    assert_eq!(factory.inner.image_attempts(&child.key(), 1), 4, "no further attempts");
    assert_eq!(harness.terrain.metrics().snapshot().retries_exhausted, 1);
}

#[test]
fn test_elevation_retry_cap_without_data() {
    let factory = Arc::new(SyntheticFactory::new().with_failing_elevation());
    let harness = Harness::new(&[], factory.clone(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.steps(20);

    assert_eq!(factory.elevation_attempts(&TileKey::root()), 4);
    assert_eq!(root.elevation_lod(), NO_LOD);
    assert_eq!(harness.terrain.metrics().snapshot().retries_exhausted, 1);
}

#[test]
fn test_retry_cap_follows_config() {
    let factory = Arc::new(SyntheticFactory::new().with_failing_elevation());
    let config = TerrainConfig::default().with_max_attempts(1);
    let harness = Harness::new(&[], factory.clone(), config);
    harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.steps(20);
    assert_eq!(factory.elevation_attempts(&TileKey::root()), 2);
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn test_updates_before_dispatch_compile_once() {
    let harness = Harness::new(&[1, 2], synthetic(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.steps(3);

    let snapshot = harness.terrain.metrics().snapshot();
    assert_eq!(snapshot.compiles_dispatched, 1);
    assert_eq!(snapshot.geometry_applied, 1);

    let geometry = root.geometry().unwrap();
    assert_eq!(
        geometry.updates,
        vec![
            TileUpdate::Elevation,
            TileUpdate::ImageLayer(1),
            TileUpdate::ImageLayer(2)
        ]
    );
    assert_eq!(geometry.elevation_lod, 0);
}

#[test]
fn test_update_during_compile_defers_and_folds() {
    let harness = Harness::new(&[1], synthetic(), TerrainConfig::default());
    let root = harness.terrain.add_tile(TileKey::root()).unwrap();

    harness.terrain.frame();
    let services = harness.provider.services();
    let (elevation, tilegen, imagery) = (&services[0], &services[1], &services[2]);

    elevation.run_pending();
    harness.terrain.frame(); // elevation installed, compile {Elevation} queued
    imagery.run_pending();
    harness.terrain.frame(); // imagery installed while the compile is pending
    tilegen.run_pending();

    let report = harness.terrain.frame(); // stale compile folded back
    assert_eq!(report.geometry_changed, 0);
    assert!(root.geometry().is_none());

    tilegen.run_pending();
    let report = harness.terrain.frame();
    assert_eq!(report.geometry_changed, 1);

    let geometry = root.geometry().unwrap();
    assert_eq!(geometry.updates, vec![TileUpdate::Elevation, TileUpdate::ImageLayer(1)]);
    let snapshot = harness.terrain.metrics().snapshot();
    assert_eq!(snapshot.compiles_dispatched, 2);
    assert_eq!(snapshot.compiles_deferred, 1);
    assert_eq!(snapshot.geometry_applied, 1);
}

#[test]
fn test_live_geometry_tracks_intermediate_lods() {
    let harness = Harness::new(&[1], synthetic(), TerrainConfig::default()).with_quadtree(3);
    let tile = harness.terrain.tile(&TileKey::new(5, 5, 3)).unwrap();

    let mut versions: Vec<(i32, i32)> = Vec::new();
    for _ in 0..60 {
        harness.step();
        if let Some(geometry) = tile.geometry() {
            let version = (geometry.elevation_lod, geometry.image_lods.get(&1).copied().unwrap_or(NO_LOD));
            if versions.last() != Some(&version) {
                versions.push(version);
            }
        }
    }

    assert_eq!(versions.last(), Some(&(3, 3)), "{:?}", versions);
    assert!(
        versions.iter().any(|(elevation, _)| (0..3).contains(elevation)),
        "placeholder elevation never reached the scene: {:?}",
        versions
    );
    assert!(
        versions.iter().any(|(_, image)| (0..3).contains(image)),
        "placeholder imagery never reached the scene: {:?}",
        versions
    );
    for pair in versions.windows(2) {
        assert!(pair[1].0 >= pair[0].0 && pair[1].1 >= pair[0].1, "{:?}", versions);
    }

    // Every compile finishes before the next pass, so none is stale
    let snapshot = harness.terrain.metrics().snapshot();
    assert_eq!(snapshot.compiles_deferred, 0);
    assert_eq!(snapshot.geometry_applied, snapshot.compiles_dispatched);
}

// ============================================================================
// Registration and Hints
// ============================================================================

#[test]
fn test_tiles_register_once() {
    let harness = Harness::new(&[1], synthetic(), TerrainConfig::default()).with_quadtree(1);
    harness.steps(5);

    assert_eq!(harness.terrain.metrics().snapshot().tiles_registered, 5);
    for tile in harness.terrain.tiles() {
        assert!(tile.is_traversed());
        assert_eq!(tile.update_traversal_hint(), 0);
    }
}

#[test]
fn test_dynamic_layer_raises_update_hint() {
    let map = Arc::new(Map::new());
    map.add_image_layer(ImageLayerInfo::new(1, "weather").with_dynamic(true));
    let provider = Arc::new(ManualProvider::new());
    let terrain = TerrainRegistry::builder(Arc::clone(&map), synthetic())
        .provider(provider)
        .build()
        .unwrap();
    let root = terrain.add_tile(TileKey::root()).unwrap();

    terrain.frame();
    assert_eq!(root.update_traversal_hint(), 1);

    map.remove_image_layer(1);
    terrain.frame();
    assert_eq!(root.update_traversal_hint(), 0);
}

#[test]
fn test_first_lod_elevation_is_up_to_date() {
    let harness = Harness::new(&[], synthetic(), TerrainConfig::default()).with_quadtree(1);
    harness.terrain.frame();

    let root = harness.terrain.tile(&TileKey::root()).unwrap();
    let child = harness.terrain.tile(&TileKey::new(0, 1, 1)).unwrap();
    assert!(root.elevation_up_to_date());
    assert!(!child.elevation_up_to_date());

    harness.steps(10);
    assert!(child.elevation_up_to_date());
    assert!(child.compute_bound().is_valid());
    assert!(child.layers().elevation().unwrap().heightfield.skirt_height() > 0.0);
}

#[test]
fn test_context_routes_layer_services() {
    let harness = Harness::new(&[7], synthetic(), TerrainConfig::default());
    harness.terrain.frame();

    let service = harness.terrain.imagery_service(7).unwrap();
    assert_eq!(service.name(), "image layer-7");
    assert!(harness.terrain.imagery_service(8).is_none());
    assert_eq!(harness.terrain.elevation_service().name(), "elevation");
    assert_eq!(harness.terrain.tilegen_service().name(), "tilegen");
}
