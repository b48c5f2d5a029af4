//! Error types for fallible setup operations.
//!
//! The reconciliation loop itself never fails; everything it cannot do is
//! resolved locally and logged. These errors cover configuration and
//! terrain construction.

use std::path::PathBuf;

use thiserror::Error;

use crate::coord::TileKey;

/// Errors loading a [`TerrainConfig`](crate::config::TerrainConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// The file could not be read or parsed
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// A value failed validation
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Errors from terrain registry operations.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// A tile with this key is already active
    #[error("Tile {0} is already registered")]
    DuplicateTile(TileKey),

    /// The key lies outside its LOD's grid
    #[error("Tile {0} is outside the tile grid")]
    InvalidTile(TileKey),

    /// Worker pool services need a tokio runtime
    #[error("No tokio runtime available: {0}")]
    MissingRuntime(String),
}
