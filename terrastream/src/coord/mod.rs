//! Quadtree tile addressing.
//!
//! Provides the [`TileKey`] spatial identity used throughout the engine, its
//! family relationships (parent, children, cardinal neighbors) and the
//! conversion from Web Mercator tile coordinates to geographic extents.

mod types;

pub use types::{GeoExtent, Quadrant, Relative, TileKey, MAX_LAT, MAX_LOD, MIN_LAT};

use std::f64::consts::PI;

/// Converts tile coordinates to the latitude/longitude of the tile's
/// northwest corner.
#[inline]
pub fn tile_to_lat_lon(key: &TileKey) -> (f64, f64) {
    let n = key.tiles_per_axis() as f64;

    let lon = key.col as f64 / n * 360.0 - 180.0;

    // Inverse Web Mercator
    let y = key.row as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}

/// Returns the geographic extent covered by a tile.
pub fn tile_extent(key: &TileKey) -> GeoExtent {
    let (north, west) = tile_to_lat_lon(key);
    let (south, east) = tile_to_lat_lon(&TileKey::new(key.row + 1, key.col + 1, key.lod));
    GeoExtent::new(west, south, east, north)
}
