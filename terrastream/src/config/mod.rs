//! Terrain configuration.
//!
//! [`TerrainConfig`] carries every tunable of the reconciliation engine with
//! a `DEFAULT_*` constant for each. Configs can be loaded from an INI file;
//! keys that are absent keep their defaults.
//!
//! # File Format
//!
//! ```ini
//! [loading]
//! ; sequential or preemptive
//! mode = sequential
//! max_attempts = 3
//! stale_threshold = 2
//!
//! [workers]
//! ; per imagery layer
//! imagery = 2
//! elevation = 2
//! tilegen = 1
//!
//! [tiles]
//! skirt_ratio = 0.02
//! vertical_scale = 1.0
//! first_lod = 0
//! ```

mod parser;

use std::path::Path;

use ini::Ini;

use crate::error::ConfigError;
use crate::executor::{LoadingMode, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_STALE_THRESHOLD};

// =============================================================================
// Defaults
// =============================================================================

/// Default worker count per imagery layer service.
pub const DEFAULT_IMAGERY_WORKERS: usize = 2;

/// Default worker count for the elevation service.
pub const DEFAULT_ELEVATION_WORKERS: usize = 2;

/// Default worker count for the geometry regeneration service.
pub const DEFAULT_TILEGEN_WORKERS: usize = 1;

/// Default skirt height as a fraction of the tile's bound radius.
pub const DEFAULT_SKIRT_RATIO: f32 = 0.02;

/// Default exaggeration applied to heights when bounding tiles.
pub const DEFAULT_VERTICAL_SCALE: f32 = 1.0;

/// Default coarsest LOD, whose elevation is always considered up to date.
pub const DEFAULT_FIRST_LOD: u8 = 0;

/// Upper bound on any worker count.
pub const MAX_WORKERS: usize = 64;

// =============================================================================
// Config
// =============================================================================

/// Tunables of the terrain engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainConfig {
    pub loading_mode: LoadingMode,
    /// Workers per imagery layer service.
    pub imagery_workers: usize,
    pub elevation_workers: usize,
    pub tilegen_workers: usize,
    /// Failed final-LOD attempts allowed before the tile stops refining.
    pub max_attempts: u32,
    /// Frames a request may lag the clock before it is abandoned.
    pub stale_threshold: i64,
    pub skirt_ratio: f32,
    pub vertical_scale: f32,
    pub first_lod: u8,
}

impl TerrainConfig {
    /// Loads a config file, overlaying its values on the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Parses INI text, overlaying its values on the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(ini::Error::Parse)?;
        parser::parse_ini(&ini)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn with_loading_mode(mut self, mode: LoadingMode) -> Self {
        self.loading_mode = mode;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            loading_mode: LoadingMode::default(),
            imagery_workers: DEFAULT_IMAGERY_WORKERS,
            elevation_workers: DEFAULT_ELEVATION_WORKERS,
            tilegen_workers: DEFAULT_TILEGEN_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            skirt_ratio: DEFAULT_SKIRT_RATIO,
            vertical_scale: DEFAULT_VERTICAL_SCALE,
            first_lod: DEFAULT_FIRST_LOD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = TerrainConfig::default();
        assert_eq!(config.loading_mode, LoadingMode::Sequential);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.stale_threshold, 2);
        assert_eq!(config.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn test_load_overlays_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[loading]\nmode = preemptive\n\n[workers]\nelevation = 4").unwrap();

        let config = TerrainConfig::load(file.path()).unwrap();
        assert_eq!(config.loading_mode, LoadingMode::Preemptive);
        assert_eq!(config.elevation_workers, 4);
        assert_eq!(config.imagery_workers, DEFAULT_IMAGERY_WORKERS);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = TerrainConfig::load(&dir.path().join("absent.ini"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        let result = TerrainConfig::parse("[loading]\nmode = eager\n");
        match result {
            Err(ConfigError::InvalidValue { section, key, .. }) => {
                assert_eq!(section, "loading");
                assert_eq!(key, "mode");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }
}
