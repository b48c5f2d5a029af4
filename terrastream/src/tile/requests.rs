//! Request constructors for the work a tile hands to task services.
//!
//! Every body owns strong references to what it reads (factory, technique,
//! parent heightfield, layer records), so a request outlives an evicted tile
//! safely and the data is released only when the request itself is dropped.

use std::sync::Arc;

use super::layers::{ColorLayer, ElevationLayer, GeoLocator, HeightField, TileLayers};
use super::update::{CompiledGeometry, TileUpdate};
use crate::coord::TileKey;
use crate::executor::{ProgressCallback, ProgressMode, TaskRequest};
use crate::map::ImageLayerInfo;
use crate::terrain::{TileFactory, TileTechnique};

pub type ElevationRequest = TaskRequest<ElevationLayer>;
pub type ImageryRequest = TaskRequest<ColorLayer>;
pub type TileGenRequest = TaskRequest<CompiledGeometry>;

/// Fetches real elevation at the tile's own LOD.
pub fn final_elevation(key: TileKey, factory: Arc<dyn TileFactory>) -> ElevationRequest {
    TaskRequest::new(
        format!("elevation {}", key),
        move |progress: &dyn ProgressCallback| {
            let heightfield = factory.create_heightfield(&key, progress)?;
            Some(ElevationLayer {
                heightfield: Arc::new(heightfield),
                locator: Some(GeoLocator::for_key(&key)),
                lod: key.level(),
            })
        },
    )
    .with_progress_mode(ProgressMode::Stamped)
}

/// Derives placeholder elevation from the parent's resident heightfield.
pub fn placeholder_elevation(
    key: TileKey,
    factory: Arc<dyn TileFactory>,
    parent: Arc<HeightField>,
    derived_lod: i32,
) -> ElevationRequest {
    TaskRequest::new(
        format!("elevation placeholder {} from lod {}", key, derived_lod),
        move |progress: &dyn ProgressCallback| {
            let heightfield = factory.create_placeholder_heightfield(&key, &parent, progress)?;
            Some(ElevationLayer {
                heightfield: Arc::new(heightfield),
                locator: Some(GeoLocator::for_key(&key)),
                lod: derived_lod,
            })
        },
    )
    .with_progress_mode(ProgressMode::Stamped)
}

/// Fetches real imagery for one layer at the tile's own LOD.
pub fn final_imagery(
    key: TileKey,
    layer: ImageLayerInfo,
    factory: Arc<dyn TileFactory>,
) -> ImageryRequest {
    TaskRequest::new(
        format!("image {} {}", layer.name, key),
        move |progress: &dyn ProgressCallback| {
            let image = factory.create_image(&key, &layer, progress)?;
            Some(ColorLayer {
                uid: layer.uid,
                image: Arc::new(image),
                locator: GeoLocator::for_key(&key),
                lod: key.level(),
            })
        },
    )
    .with_progress_mode(ProgressMode::Stamped)
}

/// Compiles the tile's geometry from its layers as they are when the body
/// runs, tagging the result with the batch of updates it covers.
pub fn regenerate(
    key: TileKey,
    layers: Arc<TileLayers>,
    technique: Arc<dyn TileTechnique>,
    batch: Vec<TileUpdate>,
) -> TileGenRequest {
    TaskRequest::new(
        format!("tilegen {}", key),
        move |progress: &dyn ProgressCallback| {
            let snapshot = layers.snapshot();
            let mut geometry = technique.compile(&key, &snapshot, progress)?;
            geometry.updates = batch.clone();
            Some(geometry)
        },
    )
    .with_progress_mode(ProgressMode::Stamped)
}
