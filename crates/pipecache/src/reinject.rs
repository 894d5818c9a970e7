//! Preloading substitute binaries from a tooling directory.
//!
//! Each file whose stem is a 32-digit hex [`PipelineHash`] is one substitute
//! binary for that pipeline. Files with any other name are ignored.

use std::fs;
use std::path::Path;

use pipecache_common::{CacheId, GfxIpVersion, PipelineHash};
use pipecache_layers::{CacheLayer, ReinjectionLayer};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::mapping::HashMappingIndex;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2MSB: u8 = 2;
const E_FLAGS_OFFSET_32: usize = 36;
const E_FLAGS_OFFSET_64: usize = 48;
const EF_AMDGPU_MACH: u32 = 0xff;

/// Returns the AMDGPU machine recorded in an ELF header's `e_flags`.
///
/// `None` for data that is not ELF, is too short, or records no machine.
pub(crate) fn elf_machine(data: &[u8]) -> Option<u32> {
    if data.len() < EI_DATA + 1 || &data[..4] != ELF_MAGIC {
        return None;
    }
    let offset = match data[EI_CLASS] {
        ELFCLASS32 => E_FLAGS_OFFSET_32,
        ELFCLASS64 => E_FLAGS_OFFSET_64,
        _ => return None,
    };
    let raw: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    let flags = if data[EI_DATA] == ELFDATA2MSB {
        u32::from_be_bytes(raw)
    } else {
        u32::from_le_bytes(raw)
    };
    Some(flags & EF_AMDGPU_MACH).filter(|mach| *mach != 0)
}

/// Whether `data` may run on `gfx_ip`.
///
/// Only a known machine that disagrees with a known target is rejected.
pub(crate) fn matches_gfx_ip(data: &[u8], gfx_ip: &GfxIpVersion) -> bool {
    match (elf_machine(data), gfx_ip.elf_machine()) {
        (Some(file), Some(target)) => file == target,
        _ => true,
    }
}

/// Loads every substitute binary in `dir` into `layer` and registers its
/// mapping in `index`.
///
/// The index write lock is held for the whole scan, so concurrent lookups see
/// either none or all of the injected mappings. Unreadable or mismatched files
/// are logged and skipped. Returns the number of binaries injected.
pub fn inject_from_directory(
    dir: &Path,
    gfx_ip: &GfxIpVersion,
    layer: &ReinjectionLayer,
    index: &HashMappingIndex,
) -> Result<usize, CacheError> {
    let io_err = |source| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut mappings = index.write();
    let mut injected = 0;
    for path in paths {
        let Some(pipeline) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<PipelineHash>().ok())
        else {
            debug!(path = %path.display(), "ignoring file without a pipeline hash name");
            continue;
        };

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot read reinjection binary");
                continue;
            }
        };
        if !matches_gfx_ip(&data, gfx_ip) {
            warn!(
                path = %path.display(),
                target = %gfx_ip,
                "reinjection binary was built for a different gfx ip"
            );
            continue;
        }

        let id = CacheId::from_data(&data);
        if let Err(err) = layer.store(&id, &data) {
            warn!(path = %path.display(), %err, "cannot store reinjection binary");
            continue;
        }
        mappings.insert(pipeline, id);
        injected += 1;
    }
    drop(mappings);

    info!(dir = %dir.display(), injected, "reinjection directory loaded");
    Ok(injected)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ELF64 header with the given `e_flags`.
    fn elf64(flags: u32) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(ELF_MAGIC);
        data[EI_CLASS] = ELFCLASS64;
        data[EI_DATA] = 1;
        data[E_FLAGS_OFFSET_64..E_FLAGS_OFFSET_64 + 4].copy_from_slice(&flags.to_le_bytes());
        data
    }

    fn elf32(flags: u32) -> Vec<u8> {
        let mut data = vec![0u8; 52];
        data[..4].copy_from_slice(ELF_MAGIC);
        data[EI_CLASS] = ELFCLASS32;
        data[EI_DATA] = 1;
        data[E_FLAGS_OFFSET_32..E_FLAGS_OFFSET_32 + 4].copy_from_slice(&flags.to_le_bytes());
        data
    }

    const GFX1030: GfxIpVersion = GfxIpVersion::new(10, 3, 0);

    #[test]
    fn reads_machine_from_both_classes() {
        assert_eq!(elf_machine(&elf64(0x536)), Some(0x36));
        assert_eq!(elf_machine(&elf32(0x41)), Some(0x41));
    }

    #[test]
    fn non_elf_has_no_machine() {
        assert_eq!(elf_machine(b"not an elf"), None);
        assert_eq!(elf_machine(&elf64(0)), None);
        assert_eq!(elf_machine(&elf64(0x36)[..40]), None);
    }

    #[test]
    fn gfx_ip_check() {
        assert!(matches_gfx_ip(&elf64(0x36), &GFX1030));
        assert!(!matches_gfx_ip(&elf64(0x41), &GFX1030));
        assert!(matches_gfx_ip(b"raw bytes", &GFX1030));
        assert!(matches_gfx_ip(&elf64(0x41), &GfxIpVersion::new(99, 0, 0)));
    }

    #[test]
    fn injects_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = PipelineHash::new(1, 2);
        let p2 = PipelineHash::new(3, 4);
        fs::write(dir.path().join(format!("{p1}.elf")), elf64(0x36)).unwrap();
        fs::write(dir.path().join(format!("{p2}.bin")), b"opaque").unwrap();
        fs::write(dir.path().join("README.txt"), b"ignored").unwrap();

        let layer = ReinjectionLayer::new();
        let index = HashMappingIndex::new();
        let n = inject_from_directory(dir.path(), &GFX1030, &layer, &index).unwrap();

        assert_eq!(n, 2);
        assert_eq!(layer.len(), 2);
        let id = index.get(&p2).unwrap();
        assert_eq!(id, CacheId::from_data(b"opaque"));
        assert_eq!(layer.load(&id).unwrap().unwrap(), b"opaque");
    }

    #[test]
    fn mismatched_elf_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let p = PipelineHash::new(7, 7);
        fs::write(dir.path().join(format!("{p}.elf")), elf64(0x41)).unwrap();

        let layer = ReinjectionLayer::new();
        let index = HashMappingIndex::new();
        let n = inject_from_directory(dir.path(), &GFX1030, &layer, &index).unwrap();

        assert_eq!(n, 0);
        assert!(layer.is_empty());
        assert!(index.get(&p).is_none());
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = inject_from_directory(
            &dir.path().join("absent"),
            &GFX1030,
            &ReinjectionLayer::new(),
            &HashMappingIndex::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }
}
