//! The capability every cache backend provides.

use pipecache_common::CacheId;

use crate::error::LayerResult;

/// Outcome of a successful [`CacheLayer::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    /// Size in bytes of the stored binary.
    pub size: usize,
}

/// A single backend in the cache chain.
///
/// Implementations must be safe to call from many threads at once. Concurrent
/// stores to the same key are resolved by the backend; the orchestrator adds
/// no ordering of its own.
pub trait CacheLayer: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Reports whether `id` is present and its size, without copying data.
    fn query(&self, id: &CacheId) -> LayerResult<Option<QueryResult>>;

    /// Returns a copy of the binary stored under `id`.
    fn load(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>>;

    /// Stores `data` under `id`.
    fn store(&self, id: &CacheId, data: &[u8]) -> LayerResult<()>;

    /// Whether write-through stores and promotions should reach this layer.
    fn is_writable(&self) -> bool {
        true
    }
}
