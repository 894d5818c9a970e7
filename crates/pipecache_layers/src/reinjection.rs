//! Layer holding externally supplied substitute binaries.

use std::collections::HashMap;

use parking_lot::RwLock;
use pipecache_common::CacheId;

use crate::error::LayerResult;
use crate::layer::{CacheLayer, QueryResult};

/// In-memory layer fed by debug tooling with replacement binaries.
///
/// It sits at the front of the chain so its binaries shadow everything else,
/// but it reports itself as not writable: ordinary write-through stores and
/// promotions skip it, and only the reinjection control surface fills it.
#[derive(Default)]
pub struct ReinjectionLayer {
    binaries: RwLock<HashMap<CacheId, Vec<u8>>>,
}

impl ReinjectionLayer {
    /// Creates an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of substitute binaries held.
    pub fn len(&self) -> usize {
        self.binaries.read().len()
    }

    /// Returns `true` if no substitutes are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheLayer for ReinjectionLayer {
    fn name(&self) -> &str {
        "reinjection"
    }

    fn query(&self, id: &CacheId) -> LayerResult<Option<QueryResult>> {
        Ok(self
            .binaries
            .read()
            .get(id)
            .map(|data| QueryResult { size: data.len() }))
    }

    fn load(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>> {
        Ok(self.binaries.read().get(id).cloned())
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> LayerResult<()> {
        self.binaries.write().insert(*id, data.to_vec());
        Ok(())
    }

    fn is_writable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_store_and_load() {
        let layer = ReinjectionLayer::new();
        let id = CacheId::from_data(b"elf");
        layer.store(&id, b"elf").unwrap();
        assert_eq!(layer.query(&id).unwrap(), Some(QueryResult { size: 3 }));
        assert_eq!(layer.load(&id).unwrap().unwrap(), b"elf");
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn not_writable_through_chain() {
        assert!(!ReinjectionLayer::new().is_writable());
    }
}
