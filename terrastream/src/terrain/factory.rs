//! Content production collaborator.

use image::RgbaImage;

use crate::coord::TileKey;
use crate::executor::ProgressCallback;
use crate::map::ImageLayerInfo;
use crate::tile::HeightField;

/// Produces tile payloads.
///
/// Methods run inside request bodies on worker threads and may block. They
/// should poll `progress` between expensive steps and return `None` when
/// canceled or when nothing could be produced; `None` counts as a failed
/// attempt unless the request was canceled.
pub trait TileFactory: Send + Sync {
    /// Imagery for `layer` covering `key`.
    fn create_image(
        &self,
        key: &TileKey,
        layer: &ImageLayerInfo,
        progress: &dyn ProgressCallback,
    ) -> Option<RgbaImage>;

    /// Elevation covering `key` at its own LOD.
    fn create_heightfield(&self, key: &TileKey, progress: &dyn ProgressCallback)
        -> Option<HeightField>;

    /// Placeholder elevation for `key` derived from its parent's heightfield.
    ///
    /// The default resamples the parent quadrant the tile occupies.
    fn create_placeholder_heightfield(
        &self,
        key: &TileKey,
        parent: &HeightField,
        progress: &dyn ProgressCallback,
    ) -> Option<HeightField> {
        if progress.is_canceled() {
            return None;
        }
        Some(parent.resample_quadrant(key.quadrant()))
    }
}
