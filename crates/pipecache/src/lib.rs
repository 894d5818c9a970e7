//! Layered, content-addressed cache for compiled graphics-pipeline binaries.
//!
//! [`PipelineBinaryCache`] composes a memory layer, on-disk archives and an
//! optional reinjection layer into one lookup chain. It provides
//! query/load/store with promotion, serialization of the memory layer into a
//! portable blob, merging of caches and blobs, and the hash-mapping index
//! debug tooling uses to substitute binaries.

#![warn(missing_docs)]

pub mod blob;
pub mod cache;
pub mod chain;
pub mod error;
pub mod mapping;
pub mod reinject;

pub use blob::{BinaryCacheEntry, ParsedBlob, PrivateHeader};
pub use cache::{CacheStats, PipelineBinary, PipelineBinaryCache};
pub use chain::{LayerChain, LayerKind};
pub use error::CacheError;
pub use mapping::HashMappingIndex;
pub use pipecache_layers::QueryResult;
