//! Reusable cache-layer backends for the pipeline binary cache.
//!
//! Every backend implements the [`CacheLayer`] capability (`query`, `load`,
//! `store`), so the orchestrator can chain them without knowing their types.
//! Provided here: a bounded [`MemoryLayer`], the [`ArchiveFile`] provider with
//! its on-disk [`FileArchive`] and the [`ArchiveLayer`] adapter, and the
//! [`ReinjectionLayer`] used by debug tooling.

#![warn(missing_docs)]

pub mod archive;
pub mod archive_layer;
pub mod error;
pub mod layer;
pub mod memory;
pub mod reinjection;

pub use archive::{ArchiveFile, ArchiveHeader, ArchiveSummary, FileArchive};
pub use archive_layer::ArchiveLayer;
pub use error::{LayerError, LayerResult};
pub use layer::{CacheLayer, QueryResult};
pub use memory::MemoryLayer;
pub use reinjection::ReinjectionLayer;
