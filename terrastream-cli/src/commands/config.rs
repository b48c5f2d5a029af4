//! Config command - print the effective configuration.

use std::path::PathBuf;

use super::common::load_config;
use crate::error::CliError;

/// Run the config command.
pub fn run(path: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(path.as_deref())?;

    match &path {
        Some(path) => println!("; effective configuration from {}", path.display()),
        None => println!("; default configuration"),
    }
    println!("[loading]");
    println!("mode = {}", config.loading_mode);
    println!("max_attempts = {}", config.max_attempts);
    println!("stale_threshold = {}", config.stale_threshold);
    println!();
    println!("[workers]");
    println!("imagery = {}", config.imagery_workers);
    println!("elevation = {}", config.elevation_workers);
    println!("tilegen = {}", config.tilegen_workers);
    println!();
    println!("[tiles]");
    println!("skirt_ratio = {}", config.skirt_ratio);
    println!("vertical_scale = {}", config.vertical_scale);
    println!("first_lod = {}", config.first_lod);

    Ok(())
}
