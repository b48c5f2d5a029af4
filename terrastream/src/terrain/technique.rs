//! Geometry compile collaborator.

use crate::coord::TileKey;
use crate::executor::ProgressCallback;
use crate::tile::{CompiledGeometry, GeoLocator, LayerSnapshot};

/// Turns a tile's layer snapshot into renderable geometry.
pub trait TileTechnique: Send + Sync {
    /// Compiles geometry for `key`. The returned value's `updates` field is
    /// filled in by the caller.
    fn compile(
        &self,
        key: &TileKey,
        layers: &LayerSnapshot,
        progress: &dyn ProgressCallback,
    ) -> Option<CompiledGeometry>;
}

/// Minimal technique that records the tile's draped corners.
///
/// Stands in for a real mesh builder in headless runs.
#[derive(Debug, Clone, Copy)]
pub struct CornerTechnique {
    vertical_scale: f32,
}

impl CornerTechnique {
    pub fn new(vertical_scale: f32) -> Self {
        Self { vertical_scale }
    }
}

impl Default for CornerTechnique {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TileTechnique for CornerTechnique {
    fn compile(
        &self,
        key: &TileKey,
        layers: &LayerSnapshot,
        progress: &dyn ProgressCallback,
    ) -> Option<CompiledGeometry> {
        if progress.is_canceled() {
            return None;
        }

        let (locator, heightfield) = match &layers.elevation {
            Some(e) => (e.locator.unwrap_or_else(|| GeoLocator::for_key(key)), Some(&e.heightfield)),
            None => (GeoLocator::for_key(key), None),
        };
        let corner = |u: f64, v: f64| {
            let height = heightfield
                .map(|hf| hf.sample(u, v))
                .filter(|h| *h != crate::tile::NO_DATA)
                .unwrap_or(0.0);
            locator.convert_local_to_model(u, v, (height * self.vertical_scale) as f64)
        };

        Some(CompiledGeometry {
            key: *key,
            elevation_lod: layers.elevation_lod(),
            image_lods: layers.color_lods(),
            corners: [corner(0.0, 0.0), corner(1.0, 0.0), corner(0.0, 1.0), corner(1.0, 1.0)],
            updates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokenProgress;
    use crate::tile::{ElevationLayer, HeightField};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_compile_records_lods() {
        let key = TileKey::new(1, 1, 2);
        let snapshot = LayerSnapshot {
            elevation: Some(ElevationLayer {
                heightfield: Arc::new(HeightField::flat(4, 4, 50.0)),
                locator: Some(GeoLocator::for_key(&key)),
                lod: 1,
            }),
            colors: Default::default(),
        };
        let progress = TokenProgress::new(CancellationToken::new());
        let geometry = CornerTechnique::default()
            .compile(&key, &snapshot, &progress)
            .unwrap();

        assert_eq!(geometry.key, key);
        assert_eq!(geometry.elevation_lod, 1);
        assert!(geometry.image_lods.is_empty());
    }

    #[test]
    fn test_canceled_compile_returns_none() {
        let token = CancellationToken::new();
        token.cancel();
        let progress = TokenProgress::new(token);
        let result =
            CornerTechnique::default().compile(&TileKey::root(), &LayerSnapshot::default(), &progress);
        assert!(result.is_none());
    }
}
