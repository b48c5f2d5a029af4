//! Terrain tiles and their LOD reconciliation.
//!
//! Each [`Tile`] owns its layer records ([`TileLayers`]), a snapshot of its
//! family's resolution ([`Family`]), and the requests it has in flight. The
//! terrain polls every tile twice per frame; the tile decides on its own
//! which layers may refine, what to request and when to swap in new geometry.
//!
//! # Components
//!
//! - [`layers`](TileLayers): elevation and color records, heightfields, locators
//! - [`readiness`](next_refinement): the single predicate gating refinement
//! - [`update`](UpdateQueue): pending geometry updates and batch coalescing
//! - [`requests`]: constructors for the work tiles hand to task services
//! - [`Tile`]: the per-tile state machine

mod bound;
mod engine;
mod family;
mod layers;
mod readiness;
pub mod requests;
mod update;

pub use bound::{compute_bound, heightfield_bound, Bound};
pub use engine::Tile;
pub use family::{Family, FamilyCell, FamilyEntry};
pub use layers::{
    ColorLayer, ElevationLayer, GeoLocator, HeightField, LayerKind, LayerSnapshot, TileLayers,
    NO_DATA, NO_LOD,
};
pub use readiness::{next_refinement, BlockReason, Refinement};
pub use requests::{ElevationRequest, ImageryRequest, TileGenRequest};
pub use update::{CompiledGeometry, TileUpdate, UpdateQueue};
