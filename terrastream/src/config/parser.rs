//! INI parsing for [`TerrainConfig`].
//!
//! The single place where INI key names map to config fields.

use std::str::FromStr;

use ini::Ini;

use super::{TerrainConfig, MAX_WORKERS};
use crate::coord::MAX_LOD;
use crate::error::ConfigError;
use crate::executor::LoadingMode;

/// Parse an `Ini` object into a `TerrainConfig`.
///
/// Starts from `TerrainConfig::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<TerrainConfig, ConfigError> {
    let mut config = TerrainConfig::default();

    // [loading] section
    if let Some(section) = ini.section(Some("loading")) {
        if let Some(v) = section.get("mode") {
            config.loading_mode =
                v.parse::<LoadingMode>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        section: "loading".to_string(),
                        key: "mode".to_string(),
                        value: v.to_string(),
                        reason,
                    })?;
        }
        if let Some(v) = section.get("max_attempts") {
            config.max_attempts =
                parse_value("loading", "max_attempts", v, "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("stale_threshold") {
            let threshold: i64 =
                parse_value("loading", "stale_threshold", v, "must be an integer")?;
            if threshold < 1 {
                return Err(invalid(
                    "loading",
                    "stale_threshold",
                    v,
                    "must be at least 1 frame",
                ));
            }
            config.stale_threshold = threshold;
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        for (key, field) in [
            ("imagery", &mut config.imagery_workers),
            ("elevation", &mut config.elevation_workers),
            ("tilegen", &mut config.tilegen_workers),
        ] {
            if let Some(v) = section.get(key) {
                let count: usize = parse_value("workers", key, v, "must be a positive integer")?;
                if count == 0 || count > MAX_WORKERS {
                    return Err(invalid(
                        "workers",
                        key,
                        v,
                        &format!("must be between 1 and {}", MAX_WORKERS),
                    ));
                }
                *field = count;
            }
        }
    }

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(v) = section.get("skirt_ratio") {
            let ratio: f32 = parse_value("tiles", "skirt_ratio", v, "must be a number")?;
            if !(0.0..=1.0).contains(&ratio) {
                return Err(invalid("tiles", "skirt_ratio", v, "must be between 0 and 1"));
            }
            config.skirt_ratio = ratio;
        }
        if let Some(v) = section.get("vertical_scale") {
            let scale: f32 = parse_value("tiles", "vertical_scale", v, "must be a number")?;
            if !scale.is_finite() || scale <= 0.0 {
                return Err(invalid("tiles", "vertical_scale", v, "must be positive"));
            }
            config.vertical_scale = scale;
        }
        if let Some(v) = section.get("first_lod") {
            let lod: u8 = parse_value("tiles", "first_lod", v, "must be a LOD number")?;
            if lod > MAX_LOD {
                return Err(invalid(
                    "tiles",
                    "first_lod",
                    v,
                    &format!("must be at most {}", MAX_LOD),
                ));
            }
            config.first_lod = lod;
        }
    }

    Ok(config)
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
