//! Bounding volumes for tiles.

use super::layers::{GeoLocator, HeightField, LayerSnapshot};

/// Samples taken per axis when bounding a heightfield.
const BOUND_SAMPLES: u32 = 5;

/// Bounding sphere in model coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub center: [f64; 3],
    /// Negative for an empty bound.
    pub radius: f64,
}

impl Bound {
    pub fn empty() -> Self {
        Self {
            center: [0.0; 3],
            radius: -1.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.radius >= 0.0
    }

    /// Smallest axis-aligned-centered sphere containing every point.
    pub fn from_points(points: &[[f64; 3]]) -> Self {
        let Some(first) = points.first() else {
            return Self::empty();
        };
        let mut min = *first;
        let mut max = *first;
        for p in points {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        let center = [
            (min[0] + max[0]) * 0.5,
            (min[1] + max[1]) * 0.5,
            (min[2] + max[2]) * 0.5,
        ];
        let radius = points
            .iter()
            .map(|p| distance(&center, p))
            .fold(0.0, f64::max);
        Self { center, radius }
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Computes a tile's bound from its layers.
///
/// Elevation wins when present; heights are multiplied by `vertical_scale`.
/// An elevation layer without a locator yields an empty bound. Without
/// elevation the bound covers the color layers' extents at sea level.
pub fn compute_bound(layers: &LayerSnapshot, vertical_scale: f32) -> Bound {
    if let Some(elevation) = &layers.elevation {
        return match &elevation.locator {
            Some(locator) => heightfield_bound(&elevation.heightfield, locator, vertical_scale),
            None => Bound::empty(),
        };
    }

    let points: Vec<[f64; 3]> = layers
        .colors
        .values()
        .flat_map(|color| corner_points(&color.locator))
        .collect();
    Bound::from_points(&points)
}

/// Bound of a heightfield draped over `locator`.
pub fn heightfield_bound(hf: &HeightField, locator: &GeoLocator, vertical_scale: f32) -> Bound {
    let mut points = Vec::with_capacity((BOUND_SAMPLES * BOUND_SAMPLES) as usize);
    for j in 0..BOUND_SAMPLES {
        for i in 0..BOUND_SAMPLES {
            let u = i as f64 / (BOUND_SAMPLES - 1) as f64;
            let v = j as f64 / (BOUND_SAMPLES - 1) as f64;
            let column = (u * (hf.columns() - 1) as f64).round() as u32;
            let row = (v * (hf.rows() - 1) as f64).round() as u32;
            let height = hf.valid_value(column, row).unwrap_or(0.0) * vertical_scale;
            points.push(locator.convert_local_to_model(u, v, height as f64));
        }
    }
    Bound::from_points(&points)
}

fn corner_points(locator: &GeoLocator) -> [[f64; 3]; 4] {
    [
        locator.convert_local_to_model(0.0, 0.0, 0.0),
        locator.convert_local_to_model(1.0, 0.0, 0.0),
        locator.convert_local_to_model(0.0, 1.0, 0.0),
        locator.convert_local_to_model(1.0, 1.0, 0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileKey;
    use crate::tile::layers::{ColorLayer, ElevationLayer};
    use image::RgbaImage;
    use std::sync::Arc;

    fn key() -> TileKey {
        TileKey::new(5, 9, 4)
    }

    fn elevation(height: f32, locator: Option<GeoLocator>) -> LayerSnapshot {
        LayerSnapshot {
            elevation: Some(ElevationLayer {
                heightfield: Arc::new(HeightField::flat(8, 8, height)),
                locator,
                lod: 4,
            }),
            colors: Default::default(),
        }
    }

    #[test]
    fn test_missing_locator_gives_empty_bound() {
        let bound = compute_bound(&elevation(100.0, None), 1.0);
        assert!(!bound.is_valid());
    }

    #[test]
    fn test_no_layers_gives_empty_bound() {
        assert!(!compute_bound(&LayerSnapshot::default(), 1.0).is_valid());
    }

    #[test]
    fn test_vertical_scale_moves_bound_outward() {
        let locator = Some(GeoLocator::for_key(&key()));
        let low = compute_bound(&elevation(1000.0, locator), 1.0);
        let high = compute_bound(&elevation(1000.0, locator), 10.0);

        let norm = |c: [f64; 3]| (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
        assert!(low.is_valid() && high.is_valid());
        assert!(norm(high.center) > norm(low.center) + 5000.0);
    }

    #[test]
    fn test_color_only_bound_covers_extent() {
        let locator = GeoLocator::for_key(&key());
        let mut snapshot = LayerSnapshot::default();
        snapshot.colors.insert(
            1,
            ColorLayer {
                uid: 1,
                image: Arc::new(RgbaImage::new(1, 1)),
                locator,
                lod: 4,
            },
        );
        let bound = compute_bound(&snapshot, 1.0);
        let corner = locator.convert_local_to_model(0.0, 0.0, 0.0);
        assert!(distance(&bound.center, &corner) <= bound.radius + 1e-6);
    }
}
