//! Immutable per-frame map snapshot.

use std::sync::Arc;

use super::{ImageLayerInfo, LayerUid};

#[derive(Debug)]
struct FrameData {
    image_layers: Vec<ImageLayerInfo>,
    has_elevation: bool,
    revision: u64,
}

/// Snapshot of the map taken once per frame.
///
/// Cheap to clone; all clones share one allocation.
#[derive(Debug, Clone)]
pub struct MapFrame {
    data: Arc<FrameData>,
}

impl MapFrame {
    pub(super) fn new(image_layers: Vec<ImageLayerInfo>, has_elevation: bool, revision: u64) -> Self {
        Self {
            data: Arc::new(FrameData {
                image_layers,
                has_elevation,
                revision,
            }),
        }
    }

    /// An empty frame with elevation enabled.
    pub fn empty() -> Self {
        Self::new(Vec::new(), true, 0)
    }

    pub fn revision(&self) -> u64 {
        self.data.revision
    }

    pub fn has_elevation(&self) -> bool {
        self.data.has_elevation
    }

    /// Imagery layers in draw order.
    pub fn image_layers(&self) -> &[ImageLayerInfo] {
        &self.data.image_layers
    }

    pub fn image_layer(&self, uid: LayerUid) -> Option<&ImageLayerInfo> {
        self.data.image_layers.iter().find(|l| l.uid == uid)
    }

    pub fn contains_layer(&self, uid: LayerUid) -> bool {
        self.image_layer(uid).is_some()
    }

    pub fn has_dynamic_layers(&self) -> bool {
        self.data.image_layers.iter().any(|l| l.dynamic)
    }
}

impl Default for MapFrame {
    fn default() -> Self {
        Self::empty()
    }
}
