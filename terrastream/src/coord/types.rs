//! Tile key and geographic extent types.

use std::fmt;

/// Maximum level of detail supported by the quadtree addressing.
pub const MAX_LOD: u8 = 24;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;

/// Spatial identity of a terrain tile.
///
/// Uses Web Mercator XYZ addressing: `row` increases southward, `col`
/// increases eastward, and each LOD doubles the grid in both directions.
///
/// # Example
///
/// ```
/// use terrastream::coord::{Relative, TileKey};
///
/// let key = TileKey::new(5, 6, 3);
/// assert_eq!(key.parent(), Some(TileKey::new(2, 3, 2)));
/// assert_eq!(key.neighbor(Relative::East), Some(TileKey::new(5, 7, 3)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Tile row (0 = north edge of the grid)
    pub row: u32,
    /// Tile column (0 = antimeridian, increasing eastward)
    pub col: u32,
    /// Level of detail
    pub lod: u8,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(row: u32, col: u32, lod: u8) -> Self {
        Self { row, col, lod }
    }

    /// The single tile covering the world at LOD 0.
    pub fn root() -> Self {
        Self::new(0, 0, 0)
    }

    /// Number of tiles along one axis at this key's LOD.
    pub fn tiles_per_axis(&self) -> u32 {
        1u32 << self.lod
    }

    /// Level of detail as a signed value, for LOD arithmetic.
    pub fn level(&self) -> i32 {
        self.lod as i32
    }

    /// Returns the key of the parent tile, or `None` at LOD 0.
    pub fn parent(&self) -> Option<TileKey> {
        if self.lod == 0 {
            return None;
        }
        Some(TileKey::new(self.row / 2, self.col / 2, self.lod - 1))
    }

    /// Returns the four children of this tile (NW, NE, SW, SE).
    pub fn children(&self) -> [TileKey; 4] {
        let row = self.row * 2;
        let col = self.col * 2;
        let lod = self.lod + 1;
        [
            TileKey::new(row, col, lod),
            TileKey::new(row, col + 1, lod),
            TileKey::new(row + 1, col, lod),
            TileKey::new(row + 1, col + 1, lod),
        ]
    }

    /// Which quadrant of its parent this tile occupies.
    pub fn quadrant(&self) -> Quadrant {
        match (self.row % 2, self.col % 2) {
            (0, 0) => Quadrant::NorthWest,
            (0, _) => Quadrant::NorthEast,
            (_, 0) => Quadrant::SouthWest,
            _ => Quadrant::SouthEast,
        }
    }

    /// Returns the key of a family member.
    ///
    /// Columns wrap around the antimeridian. Rows do not wrap, so tiles on
    /// the polar edges have no north or south neighbor.
    pub fn neighbor(&self, relative: Relative) -> Option<TileKey> {
        let n = self.tiles_per_axis();
        match relative {
            Relative::Parent => self.parent(),
            Relative::West => Some(TileKey::new(self.row, (self.col + n - 1) % n, self.lod)),
            Relative::East => Some(TileKey::new(self.row, (self.col + 1) % n, self.lod)),
            Relative::North => self
                .row
                .checked_sub(1)
                .map(|row| TileKey::new(row, self.col, self.lod)),
            Relative::South => {
                if self.row + 1 < n {
                    Some(TileKey::new(self.row + 1, self.col, self.lod))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this key addresses a cell inside its LOD's grid.
    pub fn is_valid(&self) -> bool {
        self.lod <= MAX_LOD && self.row < self.tiles_per_axis() && self.col < self.tiles_per_axis()
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.lod, self.col, self.row)
    }
}

/// Members of a tile's family: its parent and four cardinal neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relative {
    Parent,
    West,
    North,
    East,
    South,
}

impl Relative {
    /// All family members in a fixed order.
    pub const ALL: [Relative; 5] = [
        Relative::Parent,
        Relative::West,
        Relative::North,
        Relative::East,
        Relative::South,
    ];

    /// Index into a fixed-size family array.
    pub fn index(self) -> usize {
        match self {
            Relative::Parent => 0,
            Relative::West => 1,
            Relative::North => 2,
            Relative::East => 3,
            Relative::South => 4,
        }
    }
}

/// Quadrant of a parent tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

impl Quadrant {
    /// Normalized (column, row) offset of this quadrant inside its parent.
    pub fn offset(self) -> (f64, f64) {
        match self {
            Quadrant::NorthWest => (0.0, 0.0),
            Quadrant::NorthEast => (0.5, 0.0),
            Quadrant::SouthWest => (0.0, 0.5),
            Quadrant::SouthEast => (0.5, 0.5),
        }
    }
}

/// Geographic extent in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoExtent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoExtent {
    /// Create a new extent.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Center point as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }
}
