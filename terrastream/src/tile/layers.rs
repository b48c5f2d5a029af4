//! Per-tile layer records.
//!
//! A tile holds at most one elevation record and one color record per imagery
//! layer. Records are replaced whole: readers clone a record (the payloads are
//! behind `Arc`) and writers install a complete new one under the tile's
//! write lock, so a reader never observes a half-updated layer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::RwLock;

use crate::coord::{tile_extent, GeoExtent, Quadrant, TileKey};
use crate::map::LayerUid;

/// LOD value meaning "no data".
pub const NO_LOD: i32 = -1;

/// Height value marking a cell without data.
pub const NO_DATA: f32 = -32767.0;

// WGS84 ellipsoid
const WGS84_RADIUS_EQUATOR: f64 = 6_378_137.0;
const WGS84_ECCENTRICITY_SQ: f64 = 6.694_379_990_14e-3;

// =============================================================================
// Layer Kind
// =============================================================================

/// Which of a tile's layers a request or LOD refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Elevation,
    Image(LayerUid),
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Elevation => write!(f, "elevation"),
            LayerKind::Image(uid) => write!(f, "image:{}", uid),
        }
    }
}

// =============================================================================
// Height Field
// =============================================================================

/// Regular grid of heights in meters, row 0 at the north edge.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    columns: u32,
    rows: u32,
    values: Vec<f32>,
    skirt_height: f32,
}

impl HeightField {
    /// Creates a flat heightfield. Dimensions are clamped to at least 1.
    pub fn flat(columns: u32, rows: u32, height: f32) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        Self {
            columns,
            rows,
            values: vec![height; (columns * rows) as usize],
            skirt_height: 0.0,
        }
    }

    /// Wraps row-major values. Returns `None` if the length does not match.
    pub fn from_values(columns: u32, rows: u32, values: Vec<f32>) -> Option<Self> {
        if columns == 0 || rows == 0 || values.len() != (columns * rows) as usize {
            return None;
        }
        Some(Self {
            columns,
            rows,
            values,
            skirt_height: 0.0,
        })
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Raw height, including the no-data sentinel.
    pub fn height(&self, column: u32, row: u32) -> f32 {
        self.values[(row * self.columns + column) as usize]
    }

    pub fn set_height(&mut self, column: u32, row: u32, value: f32) {
        self.values[(row * self.columns + column) as usize] = value;
    }

    /// Height at a cell, or `None` for no-data cells and out-of-range indices.
    pub fn valid_value(&self, column: u32, row: u32) -> Option<f32> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        let value = self.height(column, row);
        (value != NO_DATA).then_some(value)
    }

    pub fn skirt_height(&self) -> f32 {
        self.skirt_height
    }

    pub fn set_skirt_height(&mut self, skirt_height: f32) {
        self.skirt_height = skirt_height;
    }

    /// Minimum and maximum valid heights.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|v| *v != NO_DATA)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Bilinear sample at normalized coordinates (u east, v south).
    ///
    /// No-data cells are left out of the weighting; if all four neighbors are
    /// no-data the result is [`NO_DATA`].
    pub fn sample(&self, u: f64, v: f64) -> f32 {
        let fx = u.clamp(0.0, 1.0) * (self.columns - 1) as f64;
        let fy = v.clamp(0.0, 1.0) * (self.rows - 1) as f64;
        let c0 = fx.floor() as u32;
        let r0 = fy.floor() as u32;
        let c1 = (c0 + 1).min(self.columns - 1);
        let r1 = (r0 + 1).min(self.rows - 1);
        let tx = fx - c0 as f64;
        let ty = fy - r0 as f64;

        let corners = [
            (c0, r0, (1.0 - tx) * (1.0 - ty)),
            (c1, r0, tx * (1.0 - ty)),
            (c0, r1, (1.0 - tx) * ty),
            (c1, r1, tx * ty),
        ];
        let (sum, weight) = corners
            .iter()
            .filter_map(|&(c, r, w)| self.valid_value(c, r).map(|h| (h as f64 * w, w)))
            .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));

        if weight <= f64::EPSILON {
            NO_DATA
        } else {
            (sum / weight) as f32
        }
    }

    /// Resamples one quadrant of this heightfield to the same dimensions.
    ///
    /// Used to derive a child tile's placeholder from its parent.
    pub fn resample_quadrant(&self, quadrant: Quadrant) -> HeightField {
        let (du, dv) = quadrant.offset();
        let mut values = Vec::with_capacity(self.values.len());
        for row in 0..self.rows {
            for column in 0..self.columns {
                let u = du + normalized(column, self.columns) * 0.5;
                let v = dv + normalized(row, self.rows) * 0.5;
                values.push(self.sample(u, v));
            }
        }
        HeightField {
            columns: self.columns,
            rows: self.rows,
            values,
            skirt_height: 0.0,
        }
    }
}

fn normalized(index: u32, count: u32) -> f64 {
    if count <= 1 {
        0.0
    } else {
        index as f64 / (count - 1) as f64
    }
}

// =============================================================================
// Locator
// =============================================================================

/// Maps tile-local coordinates to model (ECEF) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocator {
    extent: GeoExtent,
}

impl GeoLocator {
    pub fn new(extent: GeoExtent) -> Self {
        Self { extent }
    }

    /// Locator covering a tile's extent.
    pub fn for_key(key: &TileKey) -> Self {
        Self::new(tile_extent(key))
    }

    pub fn extent(&self) -> GeoExtent {
        self.extent
    }

    /// Converts local `(u, v, height)` to ECEF meters.
    ///
    /// `u` runs west to east and `v` north to south, both in `[0, 1]`.
    pub fn convert_local_to_model(&self, u: f64, v: f64, height: f64) -> [f64; 3] {
        let lon = self.extent.west + u * self.extent.width();
        let lat = self.extent.north - v * self.extent.height();
        geodetic_to_ecef(lat, lon, height)
    }
}

fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, height: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = WGS84_RADIUS_EQUATOR / (1.0 - WGS84_ECCENTRICITY_SQ * sin_lat * sin_lat).sqrt();
    [
        (n + height) * cos_lat * lon.cos(),
        (n + height) * cos_lat * lon.sin(),
        (n * (1.0 - WGS84_ECCENTRICITY_SQ) + height) * sin_lat,
    ]
}

// =============================================================================
// Layer Records
// =============================================================================

/// Imagery held by a tile for one layer.
#[derive(Debug, Clone)]
pub struct ColorLayer {
    pub uid: LayerUid,
    pub image: Arc<RgbaImage>,
    /// Extent the image covers. A placeholder keeps its source's locator.
    pub locator: GeoLocator,
    pub lod: i32,
}

impl ColorLayer {
    /// Same record under a different LOD label.
    pub fn relabeled(&self, lod: i32) -> Self {
        Self {
            lod,
            ..self.clone()
        }
    }
}

/// Elevation held by a tile.
#[derive(Debug, Clone)]
pub struct ElevationLayer {
    pub heightfield: Arc<HeightField>,
    pub locator: Option<GeoLocator>,
    pub lod: i32,
}

/// Cheap point-in-time copy of a tile's layers.
#[derive(Debug, Clone, Default)]
pub struct LayerSnapshot {
    pub elevation: Option<ElevationLayer>,
    pub colors: BTreeMap<LayerUid, ColorLayer>,
}

impl LayerSnapshot {
    pub fn elevation_lod(&self) -> i32 {
        self.elevation.as_ref().map_or(NO_LOD, |e| e.lod)
    }

    pub fn color_lods(&self) -> BTreeMap<LayerUid, i32> {
        self.colors.iter().map(|(uid, c)| (*uid, c.lod)).collect()
    }
}

// =============================================================================
// Tile Layers
// =============================================================================

#[derive(Debug, Default)]
struct LayerSet {
    elevation: Option<ElevationLayer>,
    colors: BTreeMap<LayerUid, ColorLayer>,
}

/// A tile's layer records behind a reader/writer lock.
///
/// Workers and the cull pass read; only the update pass writes.
#[derive(Debug, Default)]
pub struct TileLayers {
    inner: RwLock<LayerSet>,
}

impl TileLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elevation(&self) -> Option<ElevationLayer> {
        self.inner.read().elevation.clone()
    }

    pub fn elevation_lod(&self) -> i32 {
        self.inner.read().elevation.as_ref().map_or(NO_LOD, |e| e.lod)
    }

    pub fn set_elevation(&self, layer: ElevationLayer) {
        self.inner.write().elevation = Some(layer);
    }

    /// Changes the elevation LOD label without touching its data.
    pub fn relabel_elevation(&self, lod: i32) -> bool {
        match self.inner.write().elevation.as_mut() {
            Some(layer) => {
                layer.lod = lod;
                true
            }
            None => false,
        }
    }

    pub fn color(&self, uid: LayerUid) -> Option<ColorLayer> {
        self.inner.read().colors.get(&uid).cloned()
    }

    pub fn color_lod(&self, uid: LayerUid) -> i32 {
        self.inner.read().colors.get(&uid).map_or(NO_LOD, |c| c.lod)
    }

    pub fn set_color(&self, layer: ColorLayer) {
        self.inner.write().colors.insert(layer.uid, layer);
    }

    /// Drops color records whose uid fails `keep`. Returns how many went.
    pub fn retain_colors(&self, mut keep: impl FnMut(LayerUid) -> bool) -> usize {
        let mut inner = self.inner.write();
        let before = inner.colors.len();
        inner.colors.retain(|uid, _| keep(*uid));
        before - inner.colors.len()
    }

    pub fn lod(&self, kind: LayerKind) -> i32 {
        match kind {
            LayerKind::Elevation => self.elevation_lod(),
            LayerKind::Image(uid) => self.color_lod(uid),
        }
    }

    pub fn color_lods(&self) -> BTreeMap<LayerUid, i32> {
        self.inner
            .read()
            .colors
            .iter()
            .map(|(uid, c)| (*uid, c.lod))
            .collect()
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        let inner = self.inner.read();
        LayerSnapshot {
            elevation: inner.elevation.clone(),
            colors: inner.colors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(size: u32) -> HeightField {
        let values = (0..size * size).map(|i| (i % size) as f32).collect();
        HeightField::from_values(size, size, values).unwrap()
    }

    #[test]
    fn test_from_values_rejects_bad_length() {
        assert!(HeightField::from_values(2, 2, vec![0.0; 3]).is_none());
        assert!(HeightField::from_values(0, 2, vec![]).is_none());
    }

    #[test]
    fn test_valid_value_skips_no_data() {
        let mut hf = HeightField::flat(2, 2, 10.0);
        hf.set_height(1, 1, NO_DATA);
        assert_eq!(hf.valid_value(0, 0), Some(10.0));
        assert_eq!(hf.valid_value(1, 1), None);
        assert_eq!(hf.valid_value(5, 0), None);
        assert_eq!(hf.min_max(), Some((10.0, 10.0)));
    }

    #[test]
    fn test_resample_quadrant_covers_half_range() {
        // Heights equal the column index, 0..=4
        let hf = ramp(5);
        let west = hf.resample_quadrant(Quadrant::NorthWest);
        let east = hf.resample_quadrant(Quadrant::NorthEast);

        assert_eq!(west.height(0, 0), 0.0);
        assert_eq!(west.height(4, 0), 2.0);
        assert_eq!(east.height(0, 0), 2.0);
        assert_eq!(east.height(4, 0), 4.0);
    }

    #[test]
    fn test_sample_ignores_no_data_neighbors() {
        let mut hf = HeightField::flat(2, 2, 8.0);
        hf.set_height(1, 0, NO_DATA);
        assert_eq!(hf.sample(0.5, 0.0), 8.0);

        let empty = HeightField::flat(2, 2, NO_DATA);
        assert_eq!(empty.sample(0.5, 0.5), NO_DATA);
    }

    #[test]
    fn test_locator_corners_on_ellipsoid() {
        let locator = GeoLocator::new(GeoExtent::new(0.0, 0.0, 90.0, 45.0));
        let sw = locator.convert_local_to_model(0.0, 1.0, 0.0);
        assert!((sw[0] - WGS84_RADIUS_EQUATOR).abs() < 1e-6);
        assert!(sw[1].abs() < 1e-6);
        assert!(sw[2].abs() < 1e-6);
    }

    #[test]
    fn test_tile_layers_replace_whole_record() {
        let layers = TileLayers::new();
        assert_eq!(layers.color_lod(1), NO_LOD);

        let image = Arc::new(RgbaImage::new(1, 1));
        let locator = GeoLocator::for_key(&TileKey::root());
        layers.set_color(ColorLayer {
            uid: 1,
            image: image.clone(),
            locator,
            lod: 2,
        });
        layers.set_color(ColorLayer {
            uid: 1,
            image,
            locator,
            lod: 3,
        });

        assert_eq!(layers.color_lod(1), 3);
        assert_eq!(layers.lod(LayerKind::Image(1)), 3);
        assert_eq!(layers.retain_colors(|uid| uid != 1), 1);
        assert!(layers.color(1).is_none());
    }

    #[test]
    fn test_relabel_elevation_requires_record() {
        let layers = TileLayers::new();
        assert!(!layers.relabel_elevation(3));
        layers.set_elevation(ElevationLayer {
            heightfield: Arc::new(HeightField::flat(2, 2, 0.0)),
            locator: None,
            lod: 1,
        });
        assert!(layers.relabel_elevation(3));
        assert_eq!(layers.elevation_lod(), 3);
    }
}
