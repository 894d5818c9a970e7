//! Cache layer backed by an archive file.

use std::sync::Arc;

use pipecache_common::CacheId;

use crate::archive::ArchiveFile;
use crate::error::{LayerError, LayerResult};
use crate::layer::{CacheLayer, QueryResult};

/// Adapts a shared [`ArchiveFile`] to the [`CacheLayer`] capability.
pub struct ArchiveLayer {
    name: String,
    archive: Arc<dyn ArchiveFile>,
}

impl ArchiveLayer {
    /// Wraps `archive`. The layer is writable iff the archive is.
    pub fn new(archive: Arc<dyn ArchiveFile>) -> Self {
        let kind = if archive.is_read_only() {
            "archive-ro"
        } else {
            "archive"
        };
        let name = match archive.path().file_name() {
            Some(file) => format!("{kind}:{}", file.to_string_lossy()),
            None => kind.to_string(),
        };
        Self { name, archive }
    }
}

impl CacheLayer for ArchiveLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, id: &CacheId) -> LayerResult<Option<QueryResult>> {
        Ok(self.archive.size_of(id).map(|size| QueryResult { size }))
    }

    fn load(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>> {
        self.archive.read(id)
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> LayerResult<()> {
        if self.archive.is_read_only() {
            return Err(LayerError::ReadOnly);
        }
        self.archive.write(id, data)
    }

    fn is_writable(&self) -> bool {
        !self.archive.is_read_only()
    }
}
