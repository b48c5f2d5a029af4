//! Pending geometry updates and their coalescing.
//!
//! Every layer install pushes a [`TileUpdate`]. When no regeneration is in
//! flight the tile takes the whole pending queue as one batch and compiles
//! it. A batch whose compile comes back while newer updates are pending is
//! folded back in front of them, so the next compile covers the union and
//! the scene sees one swap instead of one per update.
//!
//! ```text
//!  push(A) push(B)   take_batch()        push(C)     restore([A,B])
//!  [A, B]          → [] + compile{A,B} → [C]       → [A, B, C] → compile{A,B,C}
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::coord::TileKey;
use crate::map::LayerUid;

/// One reason a tile's geometry must be recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileUpdate {
    Elevation,
    ImageLayer(LayerUid),
    /// Everything, after a configuration change.
    Rebuild,
}

impl fmt::Display for TileUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileUpdate::Elevation => write!(f, "elevation"),
            TileUpdate::ImageLayer(uid) => write!(f, "image:{}", uid),
            TileUpdate::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// FIFO of pending updates without duplicates.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: VecDeque<TileUpdate>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update. Returns false if it was already pending.
    pub fn push(&mut self, update: TileUpdate) -> bool {
        if self.pending.contains(&update) {
            return false;
        }
        self.pending.push_back(update);
        true
    }

    /// Takes every pending update as one batch, oldest first.
    pub fn take_batch(&mut self) -> Vec<TileUpdate> {
        self.pending.drain(..).collect()
    }

    /// Puts a batch back in front of the pending updates.
    pub fn restore(&mut self, batch: Vec<TileUpdate>) {
        for update in batch.into_iter().rev() {
            if let Some(pos) = self.pending.iter().position(|u| *u == update) {
                self.pending.remove(pos);
            }
            self.pending.push_front(update);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Renderable product of a geometry compile.
///
/// Opaque to the tile apart from the LODs it was built from and the updates
/// it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGeometry {
    pub key: TileKey,
    pub elevation_lod: i32,
    pub image_lods: BTreeMap<LayerUid, i32>,
    /// Model-space corners (NW, NE, SW, SE) of the compiled surface.
    pub corners: [[f64; 3]; 4],
    /// Updates folded into this compile, oldest first.
    pub updates: Vec<TileUpdate>,
}
