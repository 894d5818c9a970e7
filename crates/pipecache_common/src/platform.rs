//! Hardware/driver identity used to version persisted cache data.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{CacheId, CACHE_ID_LEN};
use crate::key::KeyDeriver;

/// Graphics IP generation of the target GPU (e.g. 10.3.0 for gfx1030).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GfxIpVersion {
    /// Major generation.
    pub major: u32,
    /// Minor revision.
    pub minor: u32,
    /// Stepping.
    pub stepping: u32,
}

impl GfxIpVersion {
    /// Creates a version triple.
    pub const fn new(major: u32, minor: u32, stepping: u32) -> Self {
        Self {
            major,
            minor,
            stepping,
        }
    }

    /// Returns the AMDGPU ELF machine code (`EF_AMDGPU_MACH_*`) for this
    /// generation, if it is one we know.
    pub fn elf_machine(&self) -> Option<u32> {
        let mach = match (self.major, self.minor, self.stepping) {
            (9, 0, 0) => 0x02c,
            (9, 0, 2) => 0x02d,
            (9, 0, 4) => 0x02e,
            (9, 0, 6) => 0x02f,
            (9, 0, 8) => 0x030,
            (9, 0, 9) => 0x031,
            (9, 0, 10) => 0x03f,
            (9, 0, 12) => 0x032,
            (10, 1, 0) => 0x033,
            (10, 1, 1) => 0x034,
            (10, 1, 2) => 0x035,
            (10, 3, 0) => 0x036,
            (10, 3, 1) => 0x037,
            (10, 3, 2) => 0x038,
            (10, 3, 3) => 0x039,
            (11, 0, 0) => 0x041,
            (11, 0, 1) => 0x046,
            (11, 0, 2) => 0x047,
            _ => return None,
        };
        Some(mach)
    }
}

impl fmt::Display for GfxIpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.stepping)
    }
}

/// Everything that determines whether a cached binary can run on this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    /// Marketing name of the physical device.
    pub device_name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// Graphics IP generation.
    pub gfx_ip: GfxIpVersion,
    /// Driver build string.
    pub driver_version: String,
    /// Pipeline cache UUID reported by the driver.
    pub cache_uuid: [u8; 16],
}

/// Error returned when a [`PlatformKey`] cannot be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("platform identity incomplete: {field} is empty")]
pub struct IdentityError {
    /// Name of the missing field.
    pub field: &'static str,
}

/// The 160-bit key stamped into every persisted blob and archive.
///
/// Data is only trusted when its stamped key matches the consumer's key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformKey([u8; CACHE_ID_LEN]);

impl PlatformKey {
    /// Derives the key from a platform identity.
    pub fn derive(identity: &PlatformIdentity) -> Result<Self, IdentityError> {
        if identity.device_name.is_empty() {
            return Err(IdentityError {
                field: "device_name",
            });
        }
        if identity.driver_version.is_empty() {
            return Err(IdentityError {
                field: "driver_version",
            });
        }

        let id = KeyDeriver::new()
            .str("pipeline-binary-cache")
            .str(&identity.device_name)
            .u32(identity.vendor_id)
            .u32(identity.device_id)
            .u32(identity.gfx_ip.major)
            .u32(identity.gfx_ip.minor)
            .u32(identity.gfx_ip.stepping)
            .str(&identity.driver_version)
            .bytes(&identity.cache_uuid)
            .finish();
        Ok(Self(*id.as_bytes()))
    }

    /// Wraps raw key bytes, e.g. ones read back from a blob header.
    pub const fn from_bytes(bytes: [u8; CACHE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; CACHE_ID_LEN] {
        &self.0
    }
}

impl From<CacheId> for PlatformKey {
    fn from(id: CacheId) -> Self {
        Self(*id.as_bytes())
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlatformKey({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
