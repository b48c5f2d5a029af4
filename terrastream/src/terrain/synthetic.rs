//! Procedural tile content for headless runs and tests.
//!
//! [`SyntheticFactory`] produces smooth heightfields and solid-color images
//! without any I/O. Failures can be injected globally (a fraction of all
//! attempts), per imagery layer or for elevation, to exercise the retry path.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use image::{Rgba, RgbaImage};

use super::TileFactory;
use crate::coord::{tile_extent, TileKey};
use crate::executor::ProgressCallback;
use crate::map::{ImageLayerInfo, LayerUid};
use crate::tile::HeightField;

/// Default heightfield dimension (posts per side).
pub const DEFAULT_HEIGHTFIELD_SIZE: u32 = 9;

/// Default image dimension in pixels.
pub const DEFAULT_IMAGE_SIZE: u32 = 16;

/// Peak relief of the generated terrain in meters.
const RELIEF_METERS: f64 = 2_500.0;

/// Which payload an attempt was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Payload {
    Elevation,
    Image(LayerUid),
}

/// Deterministic, I/O-free [`TileFactory`].
#[derive(Debug)]
pub struct SyntheticFactory {
    heightfield_size: u32,
    image_size: u32,
    failure_rate: f64,
    failing_layers: HashSet<LayerUid>,
    fail_elevation: bool,
    delay: Option<Duration>,
    attempts: DashMap<(TileKey, Payload), u32>,
    heightfields_created: AtomicU64,
    images_created: AtomicU64,
    failures: AtomicU64,
}

impl SyntheticFactory {
    pub fn new() -> Self {
        Self {
            heightfield_size: DEFAULT_HEIGHTFIELD_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
            failure_rate: 0.0,
            failing_layers: HashSet::new(),
            fail_elevation: false,
            delay: None,
            attempts: DashMap::new(),
            heightfields_created: AtomicU64::new(0),
            images_created: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Fails this fraction of attempts, clamped to `0.0..=1.0`.
    ///
    /// Whether a given attempt fails depends only on the tile, the payload
    /// and the attempt number, so runs are reproducible.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Every image request for `uid` fails.
    pub fn with_failing_layer(mut self, uid: LayerUid) -> Self {
        self.failing_layers.insert(uid);
        self
    }

    /// Every final heightfield request fails.
    pub fn with_failing_elevation(mut self) -> Self {
        self.fail_elevation = true;
        self
    }

    /// Sleeps this long per payload, polling for cancellation first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_heightfield_size(mut self, size: u32) -> Self {
        self.heightfield_size = size.max(2);
        self
    }

    pub fn heightfields_created(&self) -> u64 {
        self.heightfields_created.load(Ordering::Relaxed)
    }

    pub fn images_created(&self) -> u64 {
        self.images_created.load(Ordering::Relaxed)
    }

    /// Injected failures so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Attempts made for a tile's elevation so far.
    pub fn elevation_attempts(&self, key: &TileKey) -> u32 {
        self.attempts
            .get(&(*key, Payload::Elevation))
            .map_or(0, |n| *n)
    }

    /// Attempts made for a tile's image on one layer so far.
    pub fn image_attempts(&self, key: &TileKey, uid: LayerUid) -> u32 {
        self.attempts
            .get(&(*key, Payload::Image(uid)))
            .map_or(0, |n| *n)
    }

    fn wait(&self, progress: &dyn ProgressCallback) -> bool {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        progress.is_canceled()
    }

    fn should_fail(&self, key: &TileKey, payload: Payload) -> bool {
        let attempt = {
            let mut entry = self.attempts.entry((*key, payload)).or_insert(0);
            *entry += 1;
            *entry
        };

        let forced = match payload {
            Payload::Elevation => self.fail_elevation,
            Payload::Image(uid) => self.failing_layers.contains(&uid),
        };
        let failed = forced || roll(key, payload, attempt) < self.failure_rate;
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        failed
    }
}

impl Default for SyntheticFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TileFactory for SyntheticFactory {
    fn create_image(
        &self,
        key: &TileKey,
        layer: &ImageLayerInfo,
        progress: &dyn ProgressCallback,
    ) -> Option<RgbaImage> {
        if self.wait(progress) || self.should_fail(key, Payload::Image(layer.uid)) {
            return None;
        }
        self.images_created.fetch_add(1, Ordering::Relaxed);
        Some(RgbaImage::from_pixel(
            self.image_size,
            self.image_size,
            layer_color(layer.uid, key.lod),
        ))
    }

    fn create_heightfield(&self, key: &TileKey, progress: &dyn ProgressCallback) -> Option<HeightField> {
        if self.wait(progress) || self.should_fail(key, Payload::Elevation) {
            return None;
        }

        let extent = tile_extent(key);
        let size = self.heightfield_size;
        let step = (size - 1) as f64;
        let mut values = Vec::with_capacity((size * size) as usize);
        for row in 0..size {
            if progress.report_progress(row as f64, size as f64) {
                return None;
            }
            let lat = extent.north - extent.height() * row as f64 / step;
            for column in 0..size {
                let lon = extent.west + extent.width() * column as f64 / step;
                values.push(terrain_height(lat, lon));
            }
        }

        self.heightfields_created.fetch_add(1, Ordering::Relaxed);
        HeightField::from_values(size, size, values)
    }
}

/// Smooth rolling relief, continuous across tile edges.
fn terrain_height(lat: f64, lon: f64) -> f32 {
    let lat = lat.to_radians();
    let lon = lon.to_radians();
    (RELIEF_METERS * (3.0 * lat).sin().abs() * (2.0 * lon).cos().powi(2)) as f32
}

/// Color encoding the layer in hue and the LOD in brightness.
fn layer_color(uid: LayerUid, lod: u8) -> Rgba<u8> {
    let base = [(uid * 67) % 256, (uid * 131) % 256, (uid * 197) % 256];
    let shade = 128 + (lod as u32 * 5).min(127);
    Rgba([
        (base[0] * shade / 255) as u8,
        (base[1] * shade / 255) as u8,
        (base[2] * shade / 255) as u8,
        255,
    ])
}

/// Uniform value in `[0, 1)` derived from an attempt's identity.
fn roll(key: &TileKey, payload: Payload, attempt: u32) -> f64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    payload.hash(&mut hasher);
    attempt.hash(&mut hasher);
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokenProgress;
    use tokio_util::sync::CancellationToken;

    fn progress() -> TokenProgress {
        TokenProgress::new(CancellationToken::new())
    }

    #[test]
    fn test_heightfield_has_configured_size() {
        let factory = SyntheticFactory::new().with_heightfield_size(5);
        let hf = factory
            .create_heightfield(&TileKey::new(1, 1, 2), &progress())
            .unwrap();
        assert_eq!((hf.columns(), hf.rows()), (5, 5));
        assert_eq!(factory.heightfields_created(), 1);
    }

    #[test]
    fn test_heights_are_deterministic() {
        let factory = SyntheticFactory::new();
        let key = TileKey::new(3, 4, 3);
        let a = factory.create_heightfield(&key, &progress()).unwrap();
        let b = factory.create_heightfield(&key, &progress()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_failing_layer_always_fails() {
        let factory = SyntheticFactory::new().with_failing_layer(2);
        let key = TileKey::root();
        let ok = ImageLayerInfo::new(1, "ok");
        let bad = ImageLayerInfo::new(2, "bad");

        assert!(factory.create_image(&key, &ok, &progress()).is_some());
        for _ in 0..3 {
            assert!(factory.create_image(&key, &bad, &progress()).is_none());
        }
        assert_eq!(factory.image_attempts(&key, 2), 3);
        assert_eq!(factory.failures(), 3);
    }

    #[test]
    fn test_full_failure_rate() {
        let factory = SyntheticFactory::new().with_failure_rate(1.0);
        assert!(factory
            .create_heightfield(&TileKey::root(), &progress())
            .is_none());
        assert_eq!(factory.elevation_attempts(&TileKey::root()), 1);
    }

    #[test]
    fn test_canceled_progress_produces_nothing() {
        let factory = SyntheticFactory::new();
        let token = CancellationToken::new();
        token.cancel();
        let canceled = TokenProgress::new(token);
        assert!(factory.create_heightfield(&TileKey::root(), &canceled).is_none());
        assert_eq!(factory.elevation_attempts(&TileKey::root()), 0);
    }

    #[test]
    fn test_roll_in_unit_range() {
        for attempt in 0..100 {
            let value = roll(&TileKey::new(1, 2, 3), Payload::Elevation, attempt);
            assert!((0.0..1.0).contains(&value));
        }
    }
}
