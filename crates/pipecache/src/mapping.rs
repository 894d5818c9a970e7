//! Reader/writer-guarded index redirecting pipelines to reinjected binaries.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockWriteGuard};
use pipecache_common::{CacheId, PipelineHash};

/// Maps a pipeline's internal identity to the [`CacheId`] its binary is
/// actually stored under.
///
/// Any number of lookups may run together; a registration excludes every
/// other access for its duration. Entries are never removed.
#[derive(Default)]
pub struct HashMappingIndex {
    map: RwLock<HashMap<PipelineHash, CacheId>>,
}

impl HashMappingIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the mapping for `pipeline`.
    pub fn register(&self, pipeline: PipelineHash, id: CacheId) {
        self.map.write().insert(pipeline, id);
    }

    /// Returns the mapped key for `pipeline`, if one was registered.
    pub fn get(&self, pipeline: &PipelineHash) -> Option<CacheId> {
        self.map.read().get(pipeline).copied()
    }

    /// Number of registered pipelines.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every mapping, sorted by pipeline identity.
    pub fn snapshot(&self) -> Vec<(PipelineHash, CacheId)> {
        let mut entries: Vec<_> = self.map.read().iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort();
        entries
    }

    /// Holds the write lock across a batch of registrations.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<PipelineHash, CacheId>> {
        self.map.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get() {
        let index = HashMappingIndex::new();
        let p = PipelineHash::new(1, 2);
        let x = CacheId::from_data(b"x");
        index.register(p, x);
        assert_eq!(index.get(&p), Some(x));
    }

    #[test]
    fn reregister_overwrites() {
        let index = HashMappingIndex::new();
        let p = PipelineHash::new(1, 2);
        index.register(p, CacheId::from_data(b"x"));
        index.register(p, CacheId::from_data(b"y"));
        assert_eq!(index.get(&p), Some(CacheId::from_data(b"y")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unknown_pipeline_is_none() {
        let index = HashMappingIndex::new();
        assert!(index.get(&PipelineHash::new(9, 9)).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn snapshot_sorted() {
        let index = HashMappingIndex::new();
        index.register(PipelineHash::new(2, 0), CacheId::from_data(b"b"));
        index.register(PipelineHash::new(1, 0), CacheId::from_data(b"a"));
        let snap = index.snapshot();
        assert_eq!(snap[0].0, PipelineHash::new(1, 0));
        assert_eq!(snap[1].0, PipelineHash::new(2, 0));
    }

    #[test]
    fn batch_write_visible_after_release() {
        let index = HashMappingIndex::new();
        {
            let mut guard = index.write();
            guard.insert(PipelineHash::new(1, 1), CacheId::from_data(b"1"));
            guard.insert(PipelineHash::new(2, 2), CacheId::from_data(b"2"));
        }
        assert_eq!(index.len(), 2);
    }
}
