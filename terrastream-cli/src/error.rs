//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use terrastream::error::{ConfigError, TerrainError};

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigError),
    /// A command-line argument is out of range
    InvalidArgument(String),
    /// Terrain setup failed
    Terrain(TerrainError),
    /// The async runtime could not be started
    Runtime(std::io::Error),
    /// Ctrl-C handler could not be installed
    Signal(String),
}

impl CliError {
    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(ConfigError::InvalidValue { section, .. }) = self {
            eprintln!();
            eprintln!("Check the [{}] section of your config file.", section);
            eprintln!("Run 'terrastream config' to print the defaults.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Terrain(e) => write!(f, "Failed to create terrain: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Signal(msg) => write!(f, "Failed to set signal handler: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Terrain(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<TerrainError> for CliError {
    fn from(e: TerrainError) -> Self {
        CliError::Terrain(e)
    }
}
