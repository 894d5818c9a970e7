//! Settings types deserialized from `pipecache.toml`.

use pipecache_common::ContentHash;
use serde::Deserialize;
use std::path::PathBuf;

/// Extension given to archive files whose name is derived from the application.
pub const ARCHIVE_EXTENSION: &str = "parc";

/// Every option recognized by the layer builder.
///
/// All sections are optional; a missing section takes its defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// Name of the application the cache serves. Seeds the default archive name.
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// In-memory layer settings.
    #[serde(default)]
    pub memory: MemorySettings,
    /// On-disk archive layer settings.
    #[serde(default)]
    pub archive: ArchiveSettings,
    /// Binary reinjection settings.
    #[serde(default)]
    pub reinjection: ReinjectionSettings,
}

/// Settings for the in-memory layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemorySettings {
    /// Whether the memory layer is created.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum total payload bytes held.
    #[serde(default = "default_memory_max_size")]
    pub max_size: usize,
    /// Maximum number of entries held.
    #[serde(default = "default_memory_max_entries")]
    pub max_entries: usize,
}

/// Settings for the archive layers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveSettings {
    /// Whether archive layers are created at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding the archives. No archives are opened without one.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// File name of the default read-write archive.
    #[serde(default)]
    pub file_name: Option<String>,
    /// File name of an additional read-only archive in the same directory.
    #[serde(default)]
    pub read_only_file_name: Option<String>,
    /// Buffer size hint for archive I/O.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Settings for the reinjection layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReinjectionSettings {
    /// Whether the reinjection layer and hash-mapping index are created.
    #[serde(default)]
    pub enabled: bool,
    /// Directory scanned at startup for substitute binaries.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_application_name() -> String {
    "default".to_string()
}

fn default_memory_max_size() -> usize {
    64 * 1024 * 1024
}

fn default_memory_max_entries() -> usize {
    65_536
}

fn default_buffer_size() -> usize {
    64 * 1024
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            memory: MemorySettings::default(),
            archive: ArchiveSettings::default(),
            reinjection: ReinjectionSettings::default(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_memory_max_size(),
            max_entries: default_memory_max_entries(),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            file_name: None,
            read_only_file_name: None,
            buffer_size: default_buffer_size(),
        }
    }
}

impl CacheSettings {
    /// Settings for a memory-only cache, as used by tests and internal caches.
    pub fn memory_only() -> Self {
        Self {
            archive: ArchiveSettings {
                enabled: false,
                ..ArchiveSettings::default()
            },
            ..Self::default()
        }
    }

    /// Returns the file name of the default read-write archive.
    ///
    /// An explicit `file_name` wins; otherwise the name is the hex XXH3 hash
    /// of the application name.
    pub fn archive_file_name(&self) -> String {
        match &self.archive.file_name {
            Some(name) => name.clone(),
            None => format!(
                "{}.{ARCHIVE_EXTENSION}",
                ContentHash::from_bytes(self.application_name.as_bytes())
            ),
        }
    }
}
