//! Shared identity types for the pipeline binary cache.
//!
//! This crate provides the fixed-size cache key ([`CacheId`]), the driver's
//! internal pipeline identity ([`PipelineHash`]), payload checksums, the key
//! deriver, and the platform key that versions everything written to disk.

#![warn(missing_docs)]

pub mod hash;
pub mod key;
pub mod platform;

pub use hash::{CacheId, ContentHash, ParseIdError, PipelineHash, CACHE_ID_LEN};
pub use key::KeyDeriver;
pub use platform::{GfxIpVersion, IdentityError, PlatformIdentity, PlatformKey};
