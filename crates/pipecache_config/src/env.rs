//! Environment overrides layered on top of file settings.

use std::path::PathBuf;

use tracing::debug;

use crate::error::ConfigError;
use crate::loader::validate_settings;
use crate::types::CacheSettings;

/// Overrides the directory holding the archives.
pub const ENV_PATH: &str = "PIPELINE_CACHE_PATH";

/// Overrides the default archive file name.
pub const ENV_FILE_NAME: &str = "PIPELINE_CACHE_FILENAME";

/// Names an additional, read-only archive.
pub const ENV_READ_ONLY_FILE_NAME: &str = "PIPELINE_CACHE_READ_ONLY_FILENAME";

/// Directory of substitute binaries; also enables reinjection.
pub const ENV_REINJECTION_DIR: &str = "PIPELINE_CACHE_REINJECTION_DIR";

impl CacheSettings {
    /// Applies overrides from `lookup`, then revalidates.
    ///
    /// `lookup` maps a variable name to its value. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(path) = get(ENV_PATH) {
            debug!(%path, "archive path overridden from environment");
            self.archive.path = Some(PathBuf::from(path));
        }
        if let Some(name) = get(ENV_FILE_NAME) {
            debug!(%name, "archive file name overridden from environment");
            self.archive.file_name = Some(name);
        }
        if let Some(name) = get(ENV_READ_ONLY_FILE_NAME) {
            debug!(%name, "read-only archive named from environment");
            self.archive.read_only_file_name = Some(name);
        }
        if let Some(dir) = get(ENV_REINJECTION_DIR) {
            debug!(%dir, "reinjection enabled from environment");
            self.reinjection.enabled = true;
            self.reinjection.directory = Some(PathBuf::from(dir));
        }

        validate_settings(self)
    }

    /// Default settings overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }
}
