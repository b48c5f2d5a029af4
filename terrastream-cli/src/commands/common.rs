//! Types and helpers shared across commands.

use std::path::Path;

use clap::ValueEnum;
use terrastream::config::TerrainConfig;
use terrastream::executor::LoadingMode;

use crate::error::CliError;

/// Loading mode selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// Refine one LOD at a time, coarse tiles first
    Sequential,
    /// Fetch final imagery immediately, fine tiles first
    Preemptive,
}

impl From<ModeArg> for LoadingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => LoadingMode::Sequential,
            ModeArg::Preemptive => LoadingMode::Preemptive,
        }
    }
}

/// Loads the config file if given, otherwise the defaults.
pub fn load_config(path: Option<&Path>) -> Result<TerrainConfig, CliError> {
    match path {
        Some(path) => Ok(TerrainConfig::load(path)?),
        None => Ok(TerrainConfig::default()),
    }
}
