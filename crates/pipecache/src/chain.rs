//! Construction, ordering, and teardown of the layer chain.
//!
//! The chain owns every layer and every open archive. Layers are kept in an
//! arena in construction order; a separate index list gives the lookup order.
//! Dropping the chain releases layers in reverse construction order and then
//! flushes and closes the archives.

use std::sync::Arc;

use pipecache_common::PlatformKey;
use pipecache_config::CacheSettings;
use pipecache_layers::{
    ArchiveFile, ArchiveLayer, CacheLayer, FileArchive, LayerError, MemoryLayer,
    ReinjectionLayer,
};
use tracing::{debug, info, warn};

/// Which backend a chain slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// The bounded in-memory layer.
    Memory,
    /// The auxiliary read-only archive.
    ReadOnlyArchive,
    /// The default writable archive.
    Archive,
    /// The substitute-binary layer used by debug tooling.
    Reinjection,
}

/// Ordered, owning collection of cache layers.
#[derive(Default)]
pub struct LayerChain {
    /// Layers in construction order.
    layers: Vec<Arc<dyn CacheLayer>>,
    kinds: Vec<LayerKind>,
    /// Indices into `layers`, top of the chain first.
    lookup: Vec<usize>,
    /// Archives backing the archive layers.
    open_files: Vec<Arc<dyn ArchiveFile>>,
}

impl LayerChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `layer` to the bottom of the lookup order.
    pub fn push_back(&mut self, kind: LayerKind, layer: Arc<dyn CacheLayer>) {
        self.lookup.push(self.layers.len());
        self.layers.push(layer);
        self.kinds.push(kind);
    }

    /// Splices `layer` in front of every existing layer.
    pub fn push_front(&mut self, kind: LayerKind, layer: Arc<dyn CacheLayer>) {
        self.lookup.insert(0, self.layers.len());
        self.layers.push(layer);
        self.kinds.push(kind);
    }

    /// Takes ownership of an archive so it outlives the layers it backs.
    pub fn add_open_file(&mut self, file: Arc<dyn ArchiveFile>) {
        self.open_files.push(file);
    }

    /// Layers in lookup order, top first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CacheLayer>> + '_ {
        self.lookup.iter().map(|&i| &self.layers[i])
    }

    /// Layer kinds in lookup order.
    pub fn describe(&self) -> Vec<LayerKind> {
        self.lookup.iter().map(|&i| self.kinds[i]).collect()
    }

    /// Layer names in lookup order.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|layer| layer.name().to_string()).collect()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if the chain has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of archives held open.
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }
}

impl Drop for LayerChain {
    fn drop(&mut self) {
        self.lookup.clear();
        self.kinds.clear();
        while let Some(layer) = self.layers.pop() {
            debug!(layer = layer.name(), "releasing cache layer");
        }
        while let Some(file) = self.open_files.pop() {
            if let Err(err) = file.flush() {
                warn!(path = %file.path().display(), %err, "failed to flush archive on close");
            }
        }
    }
}

/// A built chain plus typed handles to the layers the orchestrator needs.
pub(crate) struct BuiltChain {
    pub chain: LayerChain,
    pub memory: Option<Arc<MemoryLayer>>,
    pub reinjection: Option<Arc<ReinjectionLayer>>,
}

fn open_archive_layer(
    chain: &mut LayerChain,
    kind: LayerKind,
    opened: Result<FileArchive, LayerError>,
    name: &str,
) {
    match opened {
        Ok(archive) => {
            let archive: Arc<dyn ArchiveFile> = Arc::new(archive);
            chain.add_open_file(Arc::clone(&archive));
            chain.push_back(kind, Arc::new(ArchiveLayer::new(archive)));
        }
        Err(err) => warn!(archive = name, %err, "skipping archive layer"),
    }
}

/// Builds the chain described by `settings`.
///
/// Construction order is memory, read-only archive, writable archive,
/// reinjection. Lookup order puts reinjection first and otherwise follows
/// construction. Internal caches get only the memory layer. Archives that
/// fail to open are logged and skipped.
pub(crate) fn build(settings: &CacheSettings, key: &PlatformKey, internal: bool) -> BuiltChain {
    let mut chain = LayerChain::new();

    let memory = settings.memory.enabled.then(|| {
        Arc::new(MemoryLayer::new(
            settings.memory.max_size,
            settings.memory.max_entries,
        ))
    });
    if let Some(memory) = &memory {
        chain.push_back(LayerKind::Memory, Arc::clone(memory) as Arc<dyn CacheLayer>);
    }

    if !internal && settings.archive.enabled {
        match &settings.archive.path {
            Some(dir) => {
                let buffer_size = settings.archive.buffer_size;
                if let Some(name) = &settings.archive.read_only_file_name {
                    let opened = FileArchive::open_read_only(dir, name, buffer_size, key);
                    open_archive_layer(&mut chain, LayerKind::ReadOnlyArchive, opened, name);
                }
                let name = settings.archive_file_name();
                let opened = FileArchive::open_or_create(dir, &name, buffer_size, key);
                open_archive_layer(&mut chain, LayerKind::Archive, opened, &name);
            }
            None => debug!("no archive path configured; archive layers skipped"),
        }
    }

    let reinjection = (!internal && settings.reinjection.enabled).then(|| {
        let layer = Arc::new(ReinjectionLayer::new());
        chain.push_front(
            LayerKind::Reinjection,
            Arc::clone(&layer) as Arc<dyn CacheLayer>,
        );
        layer
    });

    info!(layers = ?chain.names(), internal, "cache layer chain built");
    BuiltChain {
        chain,
        memory,
        reinjection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pipecache_common::CacheId;
    use pipecache_layers::{LayerResult, QueryResult};

    /// Records its name into a shared log when dropped.
    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.lock().push(self.name);
        }
    }

    impl CacheLayer for Tracked {
        fn name(&self) -> &str {
            self.name
        }
        fn query(&self, _: &CacheId) -> LayerResult<Option<QueryResult>> {
            Ok(None)
        }
        fn load(&self, _: &CacheId) -> LayerResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn store(&self, _: &CacheId, _: &[u8]) -> LayerResult<()> {
            Ok(())
        }
    }

    fn key() -> PlatformKey {
        PlatformKey::from(CacheId::from_data(b"platform"))
    }

    #[test]
    fn push_front_splices_ahead() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = LayerChain::new();
        for (kind, name) in [(LayerKind::Memory, "memory"), (LayerKind::Archive, "archive")] {
            chain.push_back(
                kind,
                Arc::new(Tracked {
                    name,
                    log: Arc::clone(&log),
                }),
            );
        }
        chain.push_front(
            LayerKind::Reinjection,
            Arc::new(Tracked {
                name: "reinjection",
                log: Arc::clone(&log),
            }),
        );
        assert_eq!(chain.names(), vec!["reinjection", "memory", "archive"]);
        assert_eq!(
            chain.describe(),
            vec![LayerKind::Reinjection, LayerKind::Memory, LayerKind::Archive]
        );
    }

    #[test]
    fn drop_releases_in_reverse_construction_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut chain = LayerChain::new();
            for (kind, name) in [
                (LayerKind::Memory, "memory"),
                (LayerKind::ReadOnlyArchive, "archive-ro"),
                (LayerKind::Archive, "archive"),
            ] {
                chain.push_back(
                    kind,
                    Arc::new(Tracked {
                        name,
                        log: Arc::clone(&log),
                    }),
                );
            }
            chain.push_front(
                LayerKind::Reinjection,
                Arc::new(Tracked {
                    name: "reinjection",
                    log: Arc::clone(&log),
                }),
            );
        }
        assert_eq!(
            *log.lock(),
            vec!["reinjection", "archive", "archive-ro", "memory"]
        );
    }

    #[test]
    fn default_settings_memory_only_without_path() {
        let built = build(&CacheSettings::default(), &key(), false);
        assert_eq!(built.chain.names(), vec!["memory"]);
        assert!(built.memory.is_some());
        assert!(built.reinjection.is_none());
    }

    #[test]
    fn full_chain_order() {
        let dir = tempfile::tempdir().unwrap();
        FileArchive::open_or_create(dir.path(), "ro.parc", 4096, &key()).unwrap();

        let mut settings = CacheSettings::default();
        settings.archive.path = Some(dir.path().to_path_buf());
        settings.archive.file_name = Some("app.parc".to_string());
        settings.archive.read_only_file_name = Some("ro.parc".to_string());
        settings.reinjection.enabled = true;

        let built = build(&settings, &key(), false);
        assert_eq!(
            built.chain.names(),
            vec![
                "reinjection",
                "memory",
                "archive-ro:ro.parc",
                "archive:app.parc"
            ]
        );
        assert_eq!(
            built.chain.describe(),
            vec![
                LayerKind::Reinjection,
                LayerKind::Memory,
                LayerKind::ReadOnlyArchive,
                LayerKind::Archive
            ]
        );
        assert_eq!(built.chain.open_file_count(), 2);
    }

    #[test]
    fn missing_read_only_archive_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = CacheSettings::default();
        settings.archive.path = Some(dir.path().to_path_buf());
        settings.archive.file_name = Some("app.parc".to_string());
        settings.archive.read_only_file_name = Some("absent.parc".to_string());

        let built = build(&settings, &key(), false);
        assert_eq!(built.chain.names(), vec!["memory", "archive:app.parc"]);
    }

    #[test]
    fn internal_cache_is_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = CacheSettings::default();
        settings.archive.path = Some(dir.path().to_path_buf());
        settings.reinjection.enabled = true;

        let built = build(&settings, &key(), true);
        assert_eq!(built.chain.names(), vec!["memory"]);
        assert!(built.reinjection.is_none());
    }

    #[test]
    fn memory_disabled() {
        let mut settings = CacheSettings::memory_only();
        settings.memory.enabled = false;
        let built = build(&settings, &key(), false);
        assert!(built.chain.is_empty());
        assert!(built.memory.is_none());
    }
}
