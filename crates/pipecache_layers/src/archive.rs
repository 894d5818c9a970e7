//! Single-file, append-only archives of pipeline binaries.
//!
//! An archive starts with a 4-byte little-endian header length and a bincode
//! [`ArchiveHeader`] carrying magic bytes, the format version and the platform
//! key it was written for. Records follow back to back, each a fixed-size
//! [`RecordHeader`] and then the payload. A later record for the same key
//! supersedes earlier ones.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::config::{Configuration, Fixint, LittleEndian};
use parking_lot::{Mutex, RwLock};
use pipecache_common::{CacheId, ContentHash, PlatformKey, CACHE_ID_LEN};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LayerError, LayerResult};

/// Magic bytes identifying a pipeline binary archive.
const ARCHIVE_MAGIC: [u8; 4] = *b"PBCA";

/// Current archive format version. Increment on breaking layout changes.
const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Encoded size of a [`RecordHeader`]: key, payload size, checksum.
const RECORD_HEADER_LEN: usize = CACHE_ID_LEN + 8 + 16;

fn codec() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Header at the start of every archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Magic bytes: must be `b"PBCA"`.
    pub magic: [u8; 4],
    /// Archive format version.
    pub format_version: u32,
    /// Platform the contents were compiled for.
    pub platform_key: PlatformKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    id: CacheId,
    size: u64,
    checksum: ContentHash,
}

#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    offset: u64,
    size: u64,
    checksum: ContentHash,
}

/// Listing of an archive produced by [`FileArchive::inspect`].
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// The archive header.
    pub header: ArchiveHeader,
    /// Every complete record in file order: key and payload size.
    pub records: Vec<(CacheId, u64)>,
}

/// Backing storage for an archive-backed layer.
///
/// One archive may back several layers, so implementations are shared
/// behind an `Arc` and must be thread-safe.
pub trait ArchiveFile: Send + Sync {
    /// Location of the archive on disk.
    fn path(&self) -> &Path;

    /// Whether writes are refused.
    fn is_read_only(&self) -> bool;

    /// Number of distinct keys held.
    fn len(&self) -> usize;

    /// Returns `true` if the archive holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload size for `id`, if present.
    fn size_of(&self, id: &CacheId) -> Option<usize>;

    /// Reads and verifies the payload for `id`.
    fn read(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>>;

    /// Appends a payload for `id`.
    fn write(&self, id: &CacheId, data: &[u8]) -> LayerResult<()>;

    /// Flushes written records to stable storage.
    fn flush(&self) -> LayerResult<()>;
}

struct Scan {
    header: ArchiveHeader,
    index: HashMap<CacheId, RecordLocation>,
    records: Vec<(CacheId, u64)>,
    valid_len: u64,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LayerError + '_ {
    move |source| LayerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> LayerError {
    LayerError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Reads the header and indexes every complete record.
///
/// A trailing record cut short by a crash ends the scan; `valid_len` is the
/// offset just past the last complete record.
fn scan(
    file: &File,
    path: &Path,
    buffer_size: usize,
    expected: Option<&PlatformKey>,
) -> LayerResult<Scan> {
    let file_len = file.metadata().map_err(io_err(path))?.len();
    let mut reader = BufReader::with_capacity(buffer_size, file);
    reader.seek(SeekFrom::Start(0)).map_err(io_err(path))?;

    if file_len < 4 {
        return Err(corrupt(path, "missing header length"));
    }
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(io_err(path))?;
    let header_len = u64::from(u32::from_le_bytes(len_buf));
    if 4 + header_len > file_len {
        return Err(corrupt(path, "truncated header"));
    }

    let mut header_buf = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_buf).map_err(io_err(path))?;
    let (header, _): (ArchiveHeader, usize) =
        bincode::serde::decode_from_slice(&header_buf, codec())
            .map_err(|e| corrupt(path, e.to_string()))?;

    if header.magic != ARCHIVE_MAGIC {
        return Err(corrupt(path, "bad magic bytes"));
    }
    if header.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!(
                "format version {} (expected {ARCHIVE_FORMAT_VERSION})",
                header.format_version
            ),
        ));
    }
    if let Some(key) = expected {
        if header.platform_key != *key {
            return Err(LayerError::PlatformMismatch {
                path: path.to_path_buf(),
            });
        }
    }

    let mut index = HashMap::new();
    let mut records = Vec::new();
    let mut pos = 4 + header_len;
    loop {
        let payload_start = pos + RECORD_HEADER_LEN as u64;
        if payload_start > file_len {
            break;
        }
        let mut rec_buf = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut rec_buf).map_err(io_err(path))?;
        let (rec, _): (RecordHeader, usize) = bincode::serde::decode_from_slice(&rec_buf, codec())
            .map_err(|e| corrupt(path, e.to_string()))?;

        let end = match payload_start.checked_add(rec.size) {
            Some(end) if end <= file_len => end,
            _ => break,
        };
        reader
            .seek_relative(rec.size as i64)
            .map_err(io_err(path))?;

        index.insert(
            rec.id,
            RecordLocation {
                offset: payload_start,
                size: rec.size,
                checksum: rec.checksum,
            },
        );
        records.push((rec.id, rec.size));
        pos = end;
    }

    Ok(Scan {
        header,
        index,
        records,
        valid_len: pos,
    })
}

fn write_header(file: &mut File, path: &Path, key: &PlatformKey) -> LayerResult<()> {
    let header = ArchiveHeader {
        magic: ARCHIVE_MAGIC,
        format_version: ARCHIVE_FORMAT_VERSION,
        platform_key: *key,
    };
    let header_bytes =
        bincode::serde::encode_to_vec(&header, codec()).map_err(|e| LayerError::Serialization {
            reason: e.to_string(),
        })?;

    let mut output = Vec::with_capacity(4 + header_bytes.len());
    output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    output.extend_from_slice(&header_bytes);

    file.set_len(0).map_err(io_err(path))?;
    file.seek(SeekFrom::Start(0)).map_err(io_err(path))?;
    file.write_all(&output).map_err(io_err(path))
}

/// An [`ArchiveFile`] stored as one file on disk.
pub struct FileArchive {
    path: PathBuf,
    file: Mutex<File>,
    /// Offset just past the last complete record. Only touched under `file`.
    end: AtomicU64,
    index: RwLock<HashMap<CacheId, RecordLocation>>,
    read_only: bool,
}

impl FileArchive {
    /// Opens an existing archive for reading only.
    ///
    /// Fails if the file is missing, malformed, or was written for a
    /// different platform.
    pub fn open_read_only(
        dir: &Path,
        name: &str,
        buffer_size: usize,
        key: &PlatformKey,
    ) -> LayerResult<Self> {
        let path = dir.join(name);
        let file = File::open(&path).map_err(io_err(&path))?;
        let scan = scan(&file, &path, buffer_size, Some(key))?;
        debug!(path = %path.display(), entries = scan.index.len(), "opened read-only archive");
        Ok(Self {
            path,
            file: Mutex::new(file),
            end: AtomicU64::new(scan.valid_len),
            index: RwLock::new(scan.index),
            read_only: true,
        })
    }

    /// Opens an archive for writing, creating the directory and file as needed.
    ///
    /// An existing file that is malformed or was written for a different
    /// platform is reset to an empty archive. A truncated trailing record is
    /// cut off so that new records append cleanly.
    pub fn open_or_create(
        dir: &Path,
        name: &str,
        buffer_size: usize,
        key: &PlatformKey,
    ) -> LayerResult<Self> {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;
        let file_len = file.metadata().map_err(io_err(&path))?.len();

        let (index, end) = match scan(&file, &path, buffer_size, Some(key)) {
            Ok(scan) => {
                if scan.valid_len < file_len {
                    warn!(
                        path = %path.display(),
                        dropped = file_len - scan.valid_len,
                        "truncating incomplete trailing record"
                    );
                    file.set_len(scan.valid_len).map_err(io_err(&path))?;
                }
                (scan.index, scan.valid_len)
            }
            Err(err @ LayerError::Io { .. }) => return Err(err),
            Err(err) => {
                if file_len > 0 {
                    warn!(path = %path.display(), %err, "resetting unusable archive");
                }
                write_header(&mut file, &path, key)?;
                let end = file.stream_position().map_err(io_err(&path))?;
                (HashMap::new(), end)
            }
        };

        debug!(path = %path.display(), entries = index.len(), "opened writable archive");
        Ok(Self {
            path,
            file: Mutex::new(file),
            end: AtomicU64::new(end),
            index: RwLock::new(index),
            read_only: false,
        })
    }

    /// Lists an archive's header and records without checking its platform.
    pub fn inspect(path: &Path) -> LayerResult<ArchiveSummary> {
        let file = File::open(path).map_err(io_err(path))?;
        let scan = scan(&file, path, 64 * 1024, None)?;
        Ok(ArchiveSummary {
            header: scan.header,
            records: scan.records,
        })
    }
}

impl ArchiveFile for FileArchive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }

    fn size_of(&self, id: &CacheId) -> Option<usize> {
        self.index.read().get(id).map(|loc| loc.size as usize)
    }

    fn read(&self, id: &CacheId) -> LayerResult<Option<Vec<u8>>> {
        // The index guard must be gone before the file lock is taken.
        let loc = self.index.read().get(id).copied();
        let Some(loc) = loc else {
            return Ok(None);
        };

        let mut data = vec![0u8; loc.size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(loc.offset))
                .map_err(io_err(&self.path))?;
            file.read_exact(&mut data).map_err(io_err(&self.path))?;
        }

        let actual = ContentHash::from_bytes(&data);
        if actual != loc.checksum {
            return Err(LayerError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "checksum mismatch for {id}: expected {}, got {actual}",
                    loc.checksum
                ),
            });
        }
        Ok(Some(data))
    }

    fn write(&self, id: &CacheId, data: &[u8]) -> LayerResult<()> {
        if self.read_only {
            return Err(LayerError::ReadOnly);
        }

        let checksum = ContentHash::from_bytes(data);
        let rec = RecordHeader {
            id: *id,
            size: data.len() as u64,
            checksum,
        };
        let rec_bytes =
            bincode::serde::encode_to_vec(&rec, codec()).map_err(|e| LayerError::Serialization {
                reason: e.to_string(),
            })?;

        let mut output = Vec::with_capacity(rec_bytes.len() + data.len());
        output.extend_from_slice(&rec_bytes);
        output.extend_from_slice(data);

        let mut file = self.file.lock();
        let start = self.end.load(Ordering::Relaxed);
        // Drop anything a failed append left past the last complete record.
        file.set_len(start).map_err(io_err(&self.path))?;
        file.seek(SeekFrom::Start(start)).map_err(io_err(&self.path))?;
        if let Err(source) = file.write_all(&output) {
            if let Err(err) = file.set_len(start) {
                warn!(path = %self.path.display(), %err, "could not cut off partial record");
            }
            return Err(LayerError::Io {
                path: self.path.clone(),
                source,
            });
        }
        self.end.store(start + output.len() as u64, Ordering::Relaxed);
        self.index.write().insert(
            *id,
            RecordLocation {
                offset: start + rec_bytes.len() as u64,
                size: data.len() as u64,
                checksum,
            },
        );
        Ok(())
    }

    fn flush(&self) -> LayerResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.lock().sync_data().map_err(io_err(&self.path))
    }
}
