//! Error types for backend layer operations.

use std::path::PathBuf;

/// Errors reported by a single cache layer or archive file.
///
/// A miss is never an error: lookups report it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// An I/O error occurred while reading or writing an archive.
    #[error("archive I/O error at {path}: {source}")]
    Io {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Stored data failed an integrity check.
    #[error("corrupt archive {path}: {reason}")]
    Corrupt {
        /// The archive path.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// The archive was written for a different platform key.
    #[error("archive {path} was written for a different platform")]
    PlatformMismatch {
        /// The archive path.
        path: PathBuf,
    },

    /// The layer has no room for the payload.
    #[error("layer capacity exceeded: {requested} bytes requested, {available} available")]
    CapacityExceeded {
        /// Bytes the store needed.
        requested: usize,
        /// Bytes still free.
        available: usize,
    },

    /// The layer does not accept writes.
    #[error("layer is read-only")]
    ReadOnly,

    /// A header or record could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },
}

/// Result alias for layer operations.
pub type LayerResult<T> = Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = LayerError::Io {
            path: PathBuf::from("/tmp/cache/app.parc"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("archive I/O error"));
        assert!(msg.contains("app.parc"));
    }

    #[test]
    fn capacity_display() {
        let err = LayerError::CapacityExceeded {
            requested: 10,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("10 bytes requested"));
        assert!(msg.contains("4 available"));
    }

    #[test]
    fn platform_mismatch_display() {
        let err = LayerError::PlatformMismatch {
            path: PathBuf::from("old.parc"),
        };
        assert!(err.to_string().contains("different platform"));
    }
}
