//! Settings file loading and validation.

use crate::error::ConfigError;
use crate::types::CacheSettings;
use std::path::Path;

/// Name of the settings file looked up by [`load_settings`].
pub const SETTINGS_FILE: &str = "pipecache.toml";

/// Loads and validates `pipecache.toml` from a directory.
pub fn load_settings(dir: &Path) -> Result<CacheSettings, ConfigError> {
    let content = std::fs::read_to_string(dir.join(SETTINGS_FILE))?;
    load_settings_from_str(&content)
}

/// Parses and validates settings from a TOML string.
pub fn load_settings_from_str(content: &str) -> Result<CacheSettings, ConfigError> {
    let settings: CacheSettings =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Checks that settings values are usable by the layer builder.
pub fn validate_settings(settings: &CacheSettings) -> Result<(), ConfigError> {
    if settings.archive.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "archive.buffer_size must be non-zero".to_string(),
        ));
    }
    if settings.memory.enabled && settings.memory.max_size == 0 {
        return Err(ConfigError::ValidationError(
            "memory.max_size must be non-zero when the memory layer is enabled".to_string(),
        ));
    }
    let names = [
        ("archive.file_name", settings.archive.file_name.as_deref()),
        (
            "archive.read_only_file_name",
            settings.archive.read_only_file_name.as_deref(),
        ),
    ];
    for (field, name) in names {
        if let Some(name) = name {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be a bare file name, got '{name}'"
                )));
            }
        }
    }
    Ok(())
}
