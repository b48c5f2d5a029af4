//! The readiness predicate gating LOD refinement.
//!
//! One predicate serves elevation and every imagery layer. Given the tile's
//! spatial LOD, the layer's current LOD and the family snapshot, it decides
//! whether the tile may refine that layer this pass and how:
//!
//! ```text
//! current >= tile lod                           -> Blocked(AlreadyFinal)
//! tile lod > 0, parent absent or parent lod < 0 -> Blocked(ParentUnknown)
//! expected neighbor with 0 <= lod < current     -> Blocked(NeighborBehind)
//! current + 1 == tile lod, or tile lod == 0     -> Final
//! parent lod <= current                         -> Blocked(ParentNotAhead)
//! otherwise                                     -> Placeholder(min(parent, tile - 1))
//! ```
//!
//! Neighbors that hold no data for the layer do not block; a tile must never
//! wait on a neighbor that may itself be waiting.

use std::fmt;

use super::family::Family;
use super::layers::LayerKind;
use crate::coord::Relative;

/// Why a layer may not refine this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The layer already holds data at the tile's own LOD.
    AlreadyFinal,
    /// The parent is not active or holds no data for the layer yet.
    ParentUnknown,
    /// A neighbor is behind the tile's current LOD.
    NeighborBehind(Relative),
    /// The parent has nothing finer than what the tile already holds.
    ParentNotAhead,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::AlreadyFinal => write!(f, "already final"),
            BlockReason::ParentUnknown => write!(f, "parent has no data"),
            BlockReason::NeighborBehind(r) => write!(f, "{:?} neighbor behind", r),
            BlockReason::ParentNotAhead => write!(f, "parent not ahead"),
        }
    }
}

/// Outcome of the readiness predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refinement {
    Blocked(BlockReason),
    /// Derive approximate data from the parent, labelled `derived_lod`.
    Placeholder { derived_lod: i32 },
    /// Fetch real data at the tile's own LOD.
    Final,
}

impl Refinement {
    pub fn is_ready(&self) -> bool {
        !matches!(self, Refinement::Blocked(_))
    }
}

/// Decides the next refinement step for one layer of a tile.
pub fn next_refinement(tile_lod: i32, current: i32, family: &Family, kind: LayerKind) -> Refinement {
    if current >= tile_lod {
        return Refinement::Blocked(BlockReason::AlreadyFinal);
    }

    let parent = family.parent();
    let parent_lod = parent.expected.then(|| parent.lod(kind));
    match parent_lod {
        Some(lod) if lod < 0 => return Refinement::Blocked(BlockReason::ParentUnknown),
        None if tile_lod > 0 => return Refinement::Blocked(BlockReason::ParentUnknown),
        _ => {}
    }

    for (relative, neighbor) in family.neighbors() {
        if !neighbor.expected {
            continue;
        }
        let lod = neighbor.lod(kind);
        if lod >= 0 && lod < current {
            return Refinement::Blocked(BlockReason::NeighborBehind(relative));
        }
    }

    let Some(parent_lod) = parent_lod else {
        return Refinement::Final;
    };
    if current + 1 == tile_lod {
        return Refinement::Final;
    }
    if parent_lod <= current {
        return Refinement::Blocked(BlockReason::ParentNotAhead);
    }
    Refinement::Placeholder {
        derived_lod: parent_lod.min(tile_lod - 1),
    }
}
