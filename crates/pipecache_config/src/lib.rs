//! Explicit configuration for the pipeline binary cache.
//!
//! Every option the layer builder recognizes lives in [`CacheSettings`]. Settings
//! come from an optional `pipecache.toml` and an injectable environment overlay,
//! so the cache itself never reads process-global state.

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_settings, load_settings_from_str, validate_settings, SETTINGS_FILE};
pub use types::*;
