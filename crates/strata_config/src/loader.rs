//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::StrataConfig;
use std::path::Path;

/// Loads and validates a `strata.toml` configuration from a directory.
pub fn load_config(dir: &Path) -> Result<StrataConfig, ConfigError> {
    let config_path = dir.join("strata.toml");
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `strata.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<StrataConfig, ConfigError> {
    let config: StrataConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configuration values are consistent.
fn validate_config(config: &StrataConfig) -> Result<(), ConfigError> {
    if config.remote_schemas.default_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "remote_schemas.default_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if config.build.serving_modes.is_empty() {
        return Err(ConfigError::ValidationError(
            "build.serving_modes must name at least one mode".to_string(),
        ));
    }
    Ok(())
}
