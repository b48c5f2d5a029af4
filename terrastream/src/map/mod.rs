//! Layer configuration seen by the terrain.
//!
//! [`Map`] is the mutable list of imagery layers plus an elevation flag. Every
//! change bumps its revision. Once per frame the registry takes a [`MapFrame`],
//! an immutable snapshot that the cull and update passes read without locking.
//!
//! # Example
//!
//! ```
//! use terrastream::map::{ImageLayerInfo, Map};
//!
//! let map = Map::new();
//! map.add_image_layer(ImageLayerInfo::new(1, "satellite"));
//! let frame = map.frame();
//!
//! assert!(frame.contains_layer(1));
//! assert_eq!(frame.revision(), 1);
//! ```

mod frame;

pub use frame::MapFrame;

use parking_lot::RwLock;
use tracing::debug;

/// Identity of an imagery layer.
pub type LayerUid = u32;

/// Description of one imagery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayerInfo {
    pub uid: LayerUid,
    pub name: String,
    /// Dynamic layers change content over time and keep tiles visited by the
    /// update pass.
    pub dynamic: bool,
}

impl ImageLayerInfo {
    pub fn new(uid: LayerUid, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            dynamic: false,
        }
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }
}

#[derive(Debug, Clone)]
struct MapState {
    image_layers: Vec<ImageLayerInfo>,
    has_elevation: bool,
    revision: u64,
}

/// Mutable layer configuration.
#[derive(Debug)]
pub struct Map {
    state: RwLock<MapState>,
}

impl Map {
    /// Creates a map with elevation enabled and no imagery layers.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MapState {
                image_layers: Vec::new(),
                has_elevation: true,
                revision: 0,
            }),
        }
    }

    /// Appends an imagery layer. Returns false if the uid is already present.
    pub fn add_image_layer(&self, info: ImageLayerInfo) -> bool {
        let mut state = self.state.write();
        if state.image_layers.iter().any(|l| l.uid == info.uid) {
            return false;
        }
        debug!(uid = info.uid, name = %info.name, "Image layer added");
        state.image_layers.push(info);
        state.revision += 1;
        true
    }

    /// Removes an imagery layer. Returns false if it was not present.
    pub fn remove_image_layer(&self, uid: LayerUid) -> bool {
        let mut state = self.state.write();
        let before = state.image_layers.len();
        state.image_layers.retain(|l| l.uid != uid);
        if state.image_layers.len() == before {
            return false;
        }
        debug!(uid, "Image layer removed");
        state.revision += 1;
        true
    }

    /// Moves an imagery layer to `index` in draw order.
    pub fn move_image_layer(&self, uid: LayerUid, index: usize) -> bool {
        let mut state = self.state.write();
        let Some(from) = state.image_layers.iter().position(|l| l.uid == uid) else {
            return false;
        };
        let layer = state.image_layers.remove(from);
        let index = index.min(state.image_layers.len());
        state.image_layers.insert(index, layer);
        state.revision += 1;
        true
    }

    pub fn set_elevation_enabled(&self, enabled: bool) {
        let mut state = self.state.write();
        if state.has_elevation != enabled {
            state.has_elevation = enabled;
            state.revision += 1;
        }
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Takes an immutable snapshot of the current configuration.
    pub fn frame(&self) -> MapFrame {
        let state = self.state.read();
        MapFrame::new(
            state.image_layers.clone(),
            state.has_elevation,
            state.revision,
        )
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_bumps_revision() {
        let map = Map::new();
        assert_eq!(map.revision(), 0);
        assert!(map.add_image_layer(ImageLayerInfo::new(1, "a")));
        assert!(!map.add_image_layer(ImageLayerInfo::new(1, "dup")));
        assert_eq!(map.revision(), 1);
    }

    #[test]
    fn test_remove_unknown_layer_is_noop() {
        let map = Map::new();
        assert!(!map.remove_image_layer(7));
        assert_eq!(map.revision(), 0);
    }

    #[test]
    fn test_move_reorders_layers() {
        let map = Map::new();
        map.add_image_layer(ImageLayerInfo::new(1, "a"));
        map.add_image_layer(ImageLayerInfo::new(2, "b"));
        assert!(map.move_image_layer(2, 0));

        let order: Vec<_> = map.frame().image_layers().iter().map(|l| l.uid).collect();
        assert_eq!(order, vec![2, 1]);
        assert_eq!(map.revision(), 3);
    }

    #[test]
    fn test_frame_is_isolated_from_later_changes() {
        let map = Map::new();
        map.add_image_layer(ImageLayerInfo::new(1, "a"));
        let frame = map.frame();
        map.remove_image_layer(1);

        assert!(frame.contains_layer(1));
        assert!(!map.frame().contains_layer(1));
    }

    #[test]
    fn test_elevation_toggle() {
        let map = Map::new();
        map.set_elevation_enabled(true);
        assert_eq!(map.revision(), 0);
        map.set_elevation_enabled(false);
        assert!(!map.frame().has_elevation());
        assert_eq!(map.revision(), 1);
    }
}
