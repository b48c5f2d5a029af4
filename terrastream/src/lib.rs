//! terrastream - progressive LOD streaming for terrain tiles
//!
//! Each terrain tile tracks the resolution it holds per layer (elevation and
//! any number of imagery layers), watches its parent and neighbors, and
//! refines one step at a time through background requests, so adjacent tiles
//! never drift more than one LOD apart. Completed work is folded into the
//! scene only on the single-threaded update pass.
//!
//! # Modules
//!
//! - [`coord`]: quadtree tile keys and geographic extents
//! - [`executor`]: task requests, progress callbacks and task services
//! - [`map`]: the layer list and its per-frame snapshot
//! - [`tile`]: layer records, readiness and the per-tile state machine
//! - [`terrain`]: the registry that owns tiles and services and drives frames
//! - [`config`]: INI-backed tunables
//! - [`telemetry`]: engine counters
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod coord;
pub mod error;
pub mod executor;
pub mod logging;
pub mod map;
pub mod telemetry;
pub mod terrain;
pub mod tile;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
