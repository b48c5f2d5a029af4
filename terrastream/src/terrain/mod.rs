//! Terrain-wide services and the collaborators tiles call into.
//!
//! # Components
//!
//! - [`TerrainRegistry`]: active tiles, task service routing, frame driver
//! - [`TerrainContext`]: the registry surface a tile sees
//! - [`TileFactory`] / [`TileTechnique`]: content and geometry producers
//! - [`ServiceProvider`]: how task services are built
//! - [`SyntheticFactory`]: procedural content for headless runs
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!  Map ─frame()─► │   TerrainRegistry    │──► elevation service ─┐
//!                 │  stamp, revision,    │──► imagery service(s) ├─► TileFactory
//!                 │  tiles (DashMap)     │──► tilegen service ───┴─► TileTechnique
//!                 └──────────┬───────────┘
//!                            │ &dyn TerrainContext
//!                            ▼
//!                      Tile (per key)
//! ```

mod context;
mod factory;
mod provider;
mod registry;
mod synthetic;
mod technique;

pub use context::TerrainContext;
pub use factory::TileFactory;
pub use provider::{ManualProvider, ServiceKind, ServiceProvider, WorkerPoolProvider};
pub use registry::{Convergence, FrameReport, TerrainBuilder, TerrainRegistry};
pub use synthetic::{SyntheticFactory, DEFAULT_HEIGHTFIELD_SIZE, DEFAULT_IMAGE_SIZE};
pub use technique::{CornerTechnique, TileTechnique};
