//! The pipeline binary cache: chain walk, promotion, write-through, blob
//! serialization and merging, and the reinjection control surface.

use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pipecache_common::{CacheId, GfxIpVersion, PipelineHash, PlatformIdentity, PlatformKey};
use pipecache_config::CacheSettings;
use pipecache_layers::{CacheLayer, MemoryLayer, QueryResult, ReinjectionLayer};
use tracing::{debug, warn};

use crate::blob::{self, PrivateHeader};
use crate::chain::{self, LayerChain, LayerKind};
use crate::error::CacheError;
use crate::mapping::HashMappingIndex;
use crate::reinject;

/// A binary handed out by [`PipelineBinaryCache::load_pipeline_binary`].
///
/// The caller owns the bytes. Release them with
/// [`PipelineBinaryCache::free_pipeline_binary`] or by dropping the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineBinary {
    id: CacheId,
    data: Vec<u8>,
}

impl PipelineBinary {
    /// Key the binary was found under.
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// Takes the bytes out of the binary.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for PipelineBinary {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PipelineBinary {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Point-in-time copy of a cache's operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Queries and loads answered by some layer.
    pub hits: u64,
    /// Queries and loads no layer could answer.
    pub misses: u64,
    /// Successful stores, including merged entries.
    pub stores: u64,
    /// Copies made into higher layers after a lower-layer load hit.
    pub promotions: u64,
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    promotions: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }
}

/// State that only exists when reinjection is enabled.
struct Reinjection {
    layer: Arc<ReinjectionLayer>,
    mappings: HashMappingIndex,
}

/// Layered cache of compiled pipeline binaries.
///
/// Lookups walk the chain top-down and stop at the first hit. A load that
/// hits below the top copies the binary into every writable layer above it.
/// Stores write through every writable layer. The cache owns all layers and
/// archive handles and releases them when dropped.
///
/// All operations take `&self` and may be called from many threads at once.
pub struct PipelineBinaryCache {
    reinjection: Option<Reinjection>,
    memory: Option<Arc<MemoryLayer>>,
    platform_key: PlatformKey,
    gfx_ip: GfxIpVersion,
    stats: StatCounters,
    chain: LayerChain,
}

impl PipelineBinaryCache {
    /// Builds a cache for `identity` from `settings`.
    ///
    /// Layers that fail to open are skipped. Creation only fails when the
    /// platform key cannot be derived or no layer at all could be built. A
    /// valid `init_data` blob seeds the memory layer; an invalid one is
    /// ignored.
    pub fn create(
        settings: &CacheSettings,
        identity: &PlatformIdentity,
        internal: bool,
        init_data: Option<&[u8]>,
    ) -> Result<Self, CacheError> {
        let platform_key =
            PlatformKey::derive(identity).map_err(|err| CacheError::Configuration {
                reason: err.to_string(),
            })?;

        let built = chain::build(settings, &platform_key, internal);
        if built.chain.is_empty() {
            return Err(CacheError::Configuration {
                reason: "no cache layer could be created".to_string(),
            });
        }
        if !built.chain.iter().any(|layer| layer.is_writable()) {
            return Err(CacheError::Configuration {
                reason: format!("no writable cache layer among {:?}", built.chain.names()),
            });
        }

        let cache = Self {
            reinjection: built.reinjection.map(|layer| Reinjection {
                layer,
                mappings: HashMappingIndex::new(),
            }),
            memory: built.memory,
            platform_key,
            gfx_ip: identity.gfx_ip,
            stats: StatCounters::default(),
            chain: built.chain,
        };

        if let Some(dir) = settings.reinjection.directory.as_deref() {
            if cache.is_reinjection_enabled() {
                if let Err(err) = cache.inject_binaries_from_directory(dir) {
                    warn!(dir = %dir.display(), %err, "reinjection preload failed");
                }
            }
        }

        if let Some(data) = init_data {
            cache.seed_memory(data);
        }

        Ok(cache)
    }

    fn seed_memory(&self, data: &[u8]) {
        let Some(memory) = &self.memory else {
            warn!("initial cache data ignored: no memory layer");
            return;
        };
        let parsed = match blob::validate_blob(data, &self.platform_key) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "initial cache data ignored");
                return;
            }
        };
        for (entry, payload) in parsed.entries {
            if let Err(err) = memory.store(&entry.hash_id, payload) {
                warn!(key = %entry.hash_id, %err, "initial cache entry dropped");
            }
        }
        debug!(entries = memory.len(), "memory layer seeded from initial data");
    }

    /// Reports whether some layer holds `id`, and its size, without copying.
    ///
    /// Layer errors are logged and the walk continues. If nothing hits, the
    /// first error is returned; a clean miss is `Ok(None)`.
    pub fn query_pipeline_binary(
        &self,
        id: &CacheId,
    ) -> Result<Option<QueryResult>, CacheError> {
        let mut first_err = None;
        for layer in self.chain.iter() {
            match layer.query(id) {
                Ok(Some(found)) => {
                    StatCounters::bump(&self.stats.hits);
                    return Ok(Some(found));
                }
                Ok(None) => {}
                Err(source) => {
                    warn!(layer = layer.name(), key = %id, err = %source, "query failed");
                    first_err.get_or_insert(CacheError::Layer {
                        layer: layer.name().to_string(),
                        source,
                    });
                }
            }
        }
        StatCounters::bump(&self.stats.misses);
        first_err.map_or(Ok(None), Err)
    }

    /// Loads the binary stored under `id`.
    ///
    /// The first layer that hits supplies the bytes. They are then copied
    /// into every writable layer above it; failed copies are ignored.
    pub fn load_pipeline_binary(
        &self,
        id: &CacheId,
    ) -> Result<Option<PipelineBinary>, CacheError> {
        let mut first_err = None;
        for (depth, layer) in self.chain.iter().enumerate() {
            match layer.load(id) {
                Ok(Some(data)) => {
                    StatCounters::bump(&self.stats.hits);
                    debug!(layer = layer.name(), key = %id, size = data.len(), "cache hit");
                    self.promote(id, &data, depth);
                    return Ok(Some(PipelineBinary { id: *id, data }));
                }
                Ok(None) => {}
                Err(source) => {
                    warn!(layer = layer.name(), key = %id, err = %source, "load failed");
                    first_err.get_or_insert(CacheError::Layer {
                        layer: layer.name().to_string(),
                        source,
                    });
                }
            }
        }
        StatCounters::bump(&self.stats.misses);
        first_err.map_or(Ok(None), Err)
    }

    fn promote(&self, id: &CacheId, data: &[u8], depth: usize) {
        for layer in self.chain.iter().take(depth) {
            if !layer.is_writable() {
                continue;
            }
            match layer.store(id, data) {
                Ok(()) => StatCounters::bump(&self.stats.promotions),
                Err(err) => debug!(layer = layer.name(), key = %id, %err, "promotion skipped"),
            }
        }
    }

    /// Releases a binary returned by a load.
    pub fn free_pipeline_binary(&self, binary: PipelineBinary) {
        drop(binary);
    }

    /// Writes `data` under `id` to every writable layer.
    ///
    /// A layer that fails is logged and skipped. Fails with
    /// [`CacheError::StoreRejected`] only when no layer accepted the data.
    pub fn store_pipeline_binary(&self, id: &CacheId, data: &[u8]) -> Result<(), CacheError> {
        let mut accepted = 0usize;
        for layer in self.chain.iter().filter(|layer| layer.is_writable()) {
            match layer.store(id, data) {
                Ok(()) => accepted += 1,
                Err(err) => warn!(layer = layer.name(), key = %id, %err, "store failed"),
            }
        }
        if accepted == 0 {
            return Err(CacheError::StoreRejected { key: *id });
        }
        StatCounters::bump(&self.stats.stores);
        Ok(())
    }

    /// Serializes the memory layer.
    ///
    /// With `None`, returns the exact size required. With a buffer, writes
    /// the blob and returns the bytes written; a buffer that is too small is
    /// left untouched.
    pub fn serialize(&self, buffer: Option<&mut [u8]>) -> Result<usize, CacheError> {
        let memory = self
            .memory
            .as_ref()
            .ok_or(CacheError::MemoryLayerUnavailable)?;
        let entries = memory.entries();
        match buffer {
            None => Ok(blob::required_size(&entries)),
            Some(out) => blob::write_blob(out, &PrivateHeader::new(&self.platform_key), &entries),
        }
    }

    /// Serializes the memory layer into a new buffer.
    pub fn serialize_to_vec(&self) -> Result<Vec<u8>, CacheError> {
        let memory = self
            .memory
            .as_ref()
            .ok_or(CacheError::MemoryLayerUnavailable)?;
        blob::encode_blob(&PrivateHeader::new(&self.platform_key), &memory.entries())
    }

    /// Returns `true` if `data` is a well-formed blob stamped with `key`.
    pub fn is_valid_blob(key: &PlatformKey, data: &[u8]) -> bool {
        blob::validate_blob(data, key).is_ok()
    }

    /// Checks that `data` is a well-formed blob this cache can consume.
    pub fn validate_blob(&self, data: &[u8]) -> Result<(), CacheError> {
        blob::validate_blob(data, &self.platform_key).map(|_| ())
    }

    /// Copies every memory-layer entry of `sources` into this cache.
    ///
    /// Every source is checked before anything is merged, so an incompatible
    /// source leaves this cache untouched. Keys this cache already holds are
    /// skipped. Returns the number of entries added.
    pub fn merge(&self, sources: &[&PipelineBinaryCache]) -> Result<usize, CacheError> {
        let mut snapshots = Vec::with_capacity(sources.len());
        for source in sources {
            if source.platform_key != self.platform_key {
                return Err(CacheError::PlatformMismatch {
                    expected: self.platform_key.to_string(),
                    actual: source.platform_key.to_string(),
                });
            }
            let memory = source
                .memory
                .as_ref()
                .ok_or(CacheError::MemoryLayerUnavailable)?;
            snapshots.push(memory.entries());
        }

        let mut merged = 0;
        for (id, data) in snapshots.iter().flatten() {
            if self.merge_entry(id, data) {
                merged += 1;
            }
        }
        debug!(sources = sources.len(), merged, "merged caches");
        Ok(merged)
    }

    /// Validates a serialized blob as a whole, then merges its entries with
    /// the same rules as [`merge`](Self::merge).
    pub fn merge_blob(&self, data: &[u8]) -> Result<usize, CacheError> {
        let parsed = blob::validate_blob(data, &self.platform_key)?;
        let mut merged = 0;
        for (entry, payload) in parsed.entries {
            if self.merge_entry(&entry.hash_id, payload) {
                merged += 1;
            }
        }
        debug!(merged, "merged blob");
        Ok(merged)
    }

    fn merge_entry(&self, id: &CacheId, data: &[u8]) -> bool {
        // Substitutes in the reinjection layer do not count as present.
        let present = self
            .chain
            .iter()
            .filter(|layer| layer.is_writable())
            .any(|layer| matches!(layer.query(id), Ok(Some(_))));
        if present {
            return false;
        }
        match self.store_pipeline_binary(id, data) {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %id, %err, "merge entry dropped");
                false
            }
        }
    }

    fn reinjection(&self) -> Result<&Reinjection, CacheError> {
        self.reinjection
            .as_ref()
            .ok_or(CacheError::ReinjectionDisabled)
    }

    /// Returns `true` if the reinjection layer and mapping index exist.
    pub fn is_reinjection_enabled(&self) -> bool {
        self.reinjection.is_some()
    }

    /// Redirects lookups for `pipeline` to `id`, replacing any earlier
    /// mapping.
    pub fn register_hash_mapping(
        &self,
        pipeline: PipelineHash,
        id: CacheId,
    ) -> Result<(), CacheError> {
        self.reinjection()?.mappings.register(pipeline, id);
        Ok(())
    }

    /// Returns the key registered for `pipeline`, if any.
    pub fn get_cache_id_for_pipeline(&self, pipeline: &PipelineHash) -> Option<CacheId> {
        self.reinjection
            .as_ref()
            .and_then(|r| r.mappings.get(pipeline))
    }

    /// Snapshot of all registered mappings, sorted by pipeline.
    pub fn hash_mappings(&self) -> Vec<(PipelineHash, CacheId)> {
        self.reinjection
            .as_ref()
            .map(|r| r.mappings.snapshot())
            .unwrap_or_default()
    }

    /// The key to use for `pipeline`: its registered mapping, or `natural`.
    pub fn resolve_cache_id(&self, pipeline: &PipelineHash, natural: &CacheId) -> CacheId {
        self.get_cache_id_for_pipeline(pipeline).unwrap_or(*natural)
    }

    /// [`query_pipeline_binary`](Self::query_pipeline_binary) with the key
    /// resolved through the mapping index.
    pub fn query_pipeline_binary_for(
        &self,
        pipeline: &PipelineHash,
        natural: &CacheId,
    ) -> Result<Option<QueryResult>, CacheError> {
        self.query_pipeline_binary(&self.resolve_cache_id(pipeline, natural))
    }

    /// [`load_pipeline_binary`](Self::load_pipeline_binary) with the key
    /// resolved through the mapping index.
    pub fn load_pipeline_binary_for(
        &self,
        pipeline: &PipelineHash,
        natural: &CacheId,
    ) -> Result<Option<PipelineBinary>, CacheError> {
        self.load_pipeline_binary(&self.resolve_cache_id(pipeline, natural))
    }

    /// Stores a substitute binary for `pipeline` in the reinjection layer and
    /// maps the pipeline to it. Returns the binary's key.
    pub fn store_reinjection_binary(
        &self,
        pipeline: PipelineHash,
        data: &[u8],
    ) -> Result<CacheId, CacheError> {
        let reinjection = self.reinjection()?;
        let id = CacheId::from_data(data);
        reinjection
            .layer
            .store(&id, data)
            .map_err(|source| CacheError::Layer {
                layer: reinjection.layer.name().to_string(),
                source,
            })?;
        reinjection.mappings.register(pipeline, id);
        Ok(id)
    }

    /// Loads the substitute binary mapped to `pipeline` from the reinjection
    /// layer alone.
    pub fn load_reinjection_binary(
        &self,
        pipeline: &PipelineHash,
    ) -> Result<Option<PipelineBinary>, CacheError> {
        let reinjection = self.reinjection()?;
        let Some(id) = reinjection.mappings.get(pipeline) else {
            return Ok(None);
        };
        let data = reinjection
            .layer
            .load(&id)
            .map_err(|source| CacheError::Layer {
                layer: reinjection.layer.name().to_string(),
                source,
            })?;
        Ok(data.map(|data| PipelineBinary { id, data }))
    }

    /// Loads every substitute binary in `dir`. Returns how many were loaded.
    pub fn inject_binaries_from_directory(&self, dir: &Path) -> Result<usize, CacheError> {
        let reinjection = self.reinjection()?;
        reinject::inject_from_directory(
            dir,
            &self.gfx_ip,
            &reinjection.layer,
            &reinjection.mappings,
        )
    }

    /// Current operation counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// The key stamped into this cache's blobs and archives.
    pub fn platform_key(&self) -> &PlatformKey {
        &self.platform_key
    }

    /// Names of the layers in lookup order.
    pub fn layer_names(&self) -> Vec<String> {
        self.chain.names()
    }

    /// Kinds of the layers in lookup order.
    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.chain.describe()
    }
}
