//! Bounded in-memory cache layer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pipecache_common::CacheId;

use crate::error::{LayerError, LayerResult};
use crate::layer::{CacheLayer, QueryResult};

#[derive(Default)]
struct MemoryState {
    entries: HashMap<CacheId, Arc<[u8]>>,
    /// Keys in first-insertion order, so snapshots are deterministic.
    order: Vec<CacheId>,
    total_size: usize,
}

/// Thread-safe in-memory layer with a byte and entry budget.
///
/// There is no eviction: a store that would exceed either budget fails with
/// [`LayerError::CapacityExceeded`]. Storing an existing key replaces it.
pub struct MemoryLayer {
    state: RwLock<MemoryState>,
    max_size: usize,
    max_entries: usize,
}

impl MemoryLayer {
    /// Creates an empty layer with the given budgets.
    pub fn new(max_size: usize, max_entries: usize) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            max_size,
            max_entries,
        }
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns `true` if the layer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes held.
    pub fn total_size(&self) -> usize {
        self.state.read().total_size
    }

    /// Snapshot of every entry in first-insertion order.
    pub fn entries(&self) -> Vec<(CacheId, Arc<[u8]>)> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).map(|data| (*id, Arc::clone(data))))
            .collect()
    }
}

impl CacheLayer for MemoryLayer {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(&self, id: &CacheId) -> LayerResult<Option<QueryResult>> {
        Ok(self
            .state
            .read()
            .entries
            .get(id)
            .map(|data| QueryResult { size: data.len() }))
    }

    fn load(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>> {
        Ok(self.state.read().entries.get(id).map(|data| data.to_vec()))
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> LayerResult<()> {
        let mut state = self.state.write();
        let replaced = state.entries.get(id).map_or(0, |old| old.len());
        let available = self.max_size.saturating_sub(state.total_size - replaced);
        if data.len() > available {
            return Err(LayerError::CapacityExceeded {
                requested: data.len(),
                available,
            });
        }
        let is_new = !state.entries.contains_key(id);
        if is_new && state.entries.len() >= self.max_entries {
            return Err(LayerError::CapacityExceeded {
                requested: data.len(),
                available: 0,
            });
        }

        state.total_size = state.total_size - replaced + data.len();
        state.entries.insert(*id, Arc::from(data));
        if is_new {
            state.order.push(*id);
        }
        Ok(())
    }
}
