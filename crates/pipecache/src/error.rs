//! Error types for orchestrator operations.

use std::path::PathBuf;

use pipecache_common::CacheId;
use pipecache_layers::LayerError;

/// Errors returned by the pipeline binary cache.
///
/// A lookup miss is not an error; it is reported as `Ok(None)`. Callers that
/// get an error fall back to compiling the pipeline, so none of these affect
/// correctness.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A backend layer failed.
    #[error("cache layer '{layer}' failed: {source}")]
    Layer {
        /// Name of the failing layer.
        layer: String,
        /// The backend error.
        source: LayerError,
    },

    /// An I/O error occurred outside any layer (e.g. scanning a directory).
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialized blob failed structural validation.
    #[error("invalid cache blob: {reason}")]
    InvalidBlob {
        /// Description of the problem.
        reason: String,
    },

    /// Data was produced for a different hardware/driver generation.
    #[error("platform mismatch: expected {expected}, got {actual}")]
    PlatformMismatch {
        /// Hex of the consumer's platform key.
        expected: String,
        /// Hex of the producer's platform key.
        actual: String,
    },

    /// The caller's buffer cannot hold the serialized cache.
    #[error("buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall {
        /// Bytes needed.
        required: usize,
        /// Bytes supplied.
        provided: usize,
    },

    /// A resource required to run the cache could not be established.
    #[error("cache configuration error: {reason}")]
    Configuration {
        /// Description of the problem.
        reason: String,
    },

    /// No layer in the chain accepted a store.
    #[error("no cache layer accepted binary {key}")]
    StoreRejected {
        /// Key of the rejected binary.
        key: CacheId,
    },

    /// The operation needs the memory layer, which was not created.
    #[error("memory layer is not available")]
    MemoryLayerUnavailable,

    /// The operation needs reinjection, which is disabled.
    #[error("binary reinjection is not enabled")]
    ReinjectionDisabled,

    /// A header or descriptor could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },
}
