//! Portable serialized form of a cache's memory-layer contents.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [private header: 20 bytes]
//! [entry count: u64]
//! [descriptor 0: cache id (20 bytes) + payload size (u64)] ... [descriptor N-1]
//! [payload 0] ... [payload N-1]
//! ```
//!
//! Payloads appear in descriptor order. A blob is only trusted when its
//! private header matches the consumer's platform key.

use bincode::config::{Configuration, Fixint, LittleEndian};
use pipecache_common::{CacheId, PlatformKey, CACHE_ID_LEN};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Size of the private header.
pub const PRIVATE_HEADER_SIZE: usize = CACHE_ID_LEN;

/// Size of the entry count that follows the header.
pub const ENTRY_COUNT_SIZE: usize = 8;

/// Size of one entry descriptor.
pub const DESCRIPTOR_SIZE: usize = CACHE_ID_LEN + 8;

/// Smallest well-formed blob: a header and a zero entry count.
pub const MIN_BLOB_SIZE: usize = PRIVATE_HEADER_SIZE + ENTRY_COUNT_SIZE;

fn codec() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Fixed-layout prefix naming the hardware/driver generation of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateHeader {
    /// The producer's platform key.
    pub hash_id: [u8; CACHE_ID_LEN],
}

impl PrivateHeader {
    /// Stamps a header for `key`.
    pub fn new(key: &PlatformKey) -> Self {
        Self {
            hash_id: *key.as_bytes(),
        }
    }

    /// The platform key this header names.
    pub fn platform_key(&self) -> PlatformKey {
        PlatformKey::from_bytes(self.hash_id)
    }
}

/// Index record for one binary inside a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryCacheEntry {
    /// Key of the binary.
    pub hash_id: CacheId,
    /// Payload size in bytes.
    pub data_size: usize,
}

/// A blob whose structure has been checked, borrowing its payloads.
#[derive(Debug)]
pub struct ParsedBlob<'a> {
    /// The blob's private header.
    pub header: PrivateHeader,
    /// Descriptors paired with their payloads, in blob order.
    pub entries: Vec<(BinaryCacheEntry, &'a [u8])>,
}

fn invalid(reason: impl Into<String>) -> CacheError {
    CacheError::InvalidBlob {
        reason: reason.into(),
    }
}

fn serialization(e: impl std::fmt::Display) -> CacheError {
    CacheError::Serialization {
        reason: e.to_string(),
    }
}

/// Exact number of bytes [`write_blob`] needs for `entries`.
pub fn required_size<D: AsRef<[u8]>>(entries: &[(CacheId, D)]) -> usize {
    MIN_BLOB_SIZE
        + entries.len() * DESCRIPTOR_SIZE
        + entries
            .iter()
            .map(|(_, data)| data.as_ref().len())
            .sum::<usize>()
}

/// Writes a blob into `out` and returns the number of bytes written.
///
/// Fails with [`CacheError::BufferTooSmall`] before touching `out` when it
/// cannot hold the whole blob.
pub fn write_blob<D: AsRef<[u8]>>(
    out: &mut [u8],
    header: &PrivateHeader,
    entries: &[(CacheId, D)],
) -> Result<usize, CacheError> {
    let required = required_size(entries);
    if out.len() < required {
        return Err(CacheError::BufferTooSmall {
            required,
            provided: out.len(),
        });
    }

    let mut pos = bincode::serde::encode_into_slice(header, &mut out[..], codec())
        .map_err(serialization)?;
    out[pos..pos + ENTRY_COUNT_SIZE].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    pos += ENTRY_COUNT_SIZE;

    for (id, data) in entries {
        let descriptor = BinaryCacheEntry {
            hash_id: *id,
            data_size: data.as_ref().len(),
        };
        pos += bincode::serde::encode_into_slice(descriptor, &mut out[pos..], codec())
            .map_err(serialization)?;
    }
    for (_, data) in entries {
        let data = data.as_ref();
        out[pos..pos + data.len()].copy_from_slice(data);
        pos += data.len();
    }
    Ok(pos)
}

/// Encodes a blob into a freshly allocated buffer.
pub fn encode_blob<D: AsRef<[u8]>>(
    header: &PrivateHeader,
    entries: &[(CacheId, D)],
) -> Result<Vec<u8>, CacheError> {
    let mut out = vec![0u8; required_size(entries)];
    write_blob(&mut out, header, entries)?;
    Ok(out)
}

/// Reads the private header after checking the minimum blob size.
pub fn read_header(data: &[u8]) -> Result<PrivateHeader, CacheError> {
    if data.len() < MIN_BLOB_SIZE {
        return Err(invalid(format!(
            "{} bytes is smaller than the minimum of {MIN_BLOB_SIZE}",
            data.len()
        )));
    }
    let (header, _): (PrivateHeader, usize) =
        bincode::serde::decode_from_slice(&data[..PRIVATE_HEADER_SIZE], codec())
            .map_err(serialization)?;
    Ok(header)
}

/// Checks size and private header against `key`, without reading any
/// descriptors.
pub fn check_header(data: &[u8], key: &PlatformKey) -> Result<PrivateHeader, CacheError> {
    let header = read_header(data)?;
    if header.hash_id != *key.as_bytes() {
        return Err(CacheError::PlatformMismatch {
            expected: key.to_string(),
            actual: header.platform_key().to_string(),
        });
    }
    Ok(header)
}

/// Parses a blob's full structure. The header is not checked against any key.
///
/// Bytes past the last payload are ignored, so a blob written into a larger
/// buffer still parses.
pub fn parse_blob(data: &[u8]) -> Result<ParsedBlob<'_>, CacheError> {
    let header = read_header(data)?;

    let mut count_bytes = [0u8; ENTRY_COUNT_SIZE];
    count_bytes.copy_from_slice(&data[PRIVATE_HEADER_SIZE..MIN_BLOB_SIZE]);
    let count = u64::from_le_bytes(count_bytes);

    let descriptors_end = usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(DESCRIPTOR_SIZE))
        .and_then(|len| len.checked_add(MIN_BLOB_SIZE))
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            invalid(format!(
                "{count} descriptors do not fit in {} bytes",
                data.len()
            ))
        })?;

    let mut descriptors = Vec::with_capacity((descriptors_end - MIN_BLOB_SIZE) / DESCRIPTOR_SIZE);
    let mut pos = MIN_BLOB_SIZE;
    while pos < descriptors_end {
        let (descriptor, _): (BinaryCacheEntry, usize) =
            bincode::serde::decode_from_slice(&data[pos..pos + DESCRIPTOR_SIZE], codec())
                .map_err(serialization)?;
        descriptors.push(descriptor);
        pos += DESCRIPTOR_SIZE;
    }

    let mut entries = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let end = pos
            .checked_add(descriptor.data_size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                invalid(format!(
                    "payload for {} runs past the end of the blob",
                    descriptor.hash_id
                ))
            })?;
        entries.push((descriptor, &data[pos..end]));
        pos = end;
    }

    Ok(ParsedBlob { header, entries })
}

/// Checks the header against `key`, then the full structure.
pub fn validate_blob<'a>(data: &'a [u8], key: &PlatformKey) -> Result<ParsedBlob<'a>, CacheError> {
    check_header(data, key)?;
    parse_blob(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: &[u8]) -> PlatformKey {
        PlatformKey::from(CacheId::from_data(tag))
    }

    fn sample() -> Vec<(CacheId, Vec<u8>)> {
        vec![
            (CacheId::from_data(b"a"), b"ABCD".to_vec()),
            (CacheId::from_data(b"b"), b"pipeline two".to_vec()),
        ]
    }

    #[test]
    fn encoded_sizes_match_constants() {
        let header = PrivateHeader::new(&key(b"p"));
        assert_eq!(
            bincode::serde::encode_to_vec(header, codec()).unwrap().len(),
            PRIVATE_HEADER_SIZE
        );
        let descriptor = BinaryCacheEntry {
            hash_id: CacheId::from_data(b"x"),
            data_size: 9,
        };
        assert_eq!(
            bincode::serde::encode_to_vec(descriptor, codec()).unwrap().len(),
            DESCRIPTOR_SIZE
        );
    }

    #[test]
    fn required_size_counts_everything() {
        assert_eq!(required_size::<Vec<u8>>(&[]), MIN_BLOB_SIZE);
        assert_eq!(
            required_size(&sample()),
            MIN_BLOB_SIZE + 2 * DESCRIPTOR_SIZE + 4 + 12
        );
    }

    #[test]
    fn write_then_parse() {
        let header = PrivateHeader::new(&key(b"p"));
        let blob = encode_blob(&header, &sample()).unwrap();
        let parsed = validate_blob(&blob, &key(b"p")).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].0.hash_id, CacheId::from_data(b"a"));
        assert_eq!(parsed.entries[0].0.data_size, 4);
        assert_eq!(parsed.entries[0].1, b"ABCD");
        assert_eq!(parsed.entries[1].1, b"pipeline two");
    }

    #[test]
    fn short_buffer_untouched() {
        let header = PrivateHeader::new(&key(b"p"));
        let entries = sample();
        let required = required_size(&entries);
        let mut out = vec![0xeeu8; required - 1];
        let err = write_blob(&mut out, &header, &entries).unwrap_err();
        let CacheError::BufferTooSmall {
            required: r,
            provided: p,
        } = &err
        else {
            panic!("expected BufferTooSmall, got {err:?}");
        };
        assert_eq!((*r, *p), (required, required - 1));
        assert!(out.iter().all(|b| *b == 0xee));
    }

    #[test]
    fn exact_buffer_succeeds() {
        let header = PrivateHeader::new(&key(b"p"));
        let entries = sample();
        let mut out = vec![0u8; required_size(&entries)];
        let written = write_blob(&mut out, &header, &entries).unwrap();
        assert_eq!(written, out.len());
    }

    #[test]
    fn trailing_bytes_ignored() {
        let header = PrivateHeader::new(&key(b"p"));
        let mut blob = encode_blob(&header, &sample()).unwrap();
        blob.extend_from_slice(&[0; 16]);
        assert_eq!(parse_blob(&blob).unwrap().entries.len(), 2);
    }

    #[test]
    fn too_short_rejected() {
        let err = read_header(&[0u8; MIN_BLOB_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidBlob { .. }));
    }

    #[test]
    fn header_mismatch_rejected_before_descriptors() {
        // The count field claims an absurd number of descriptors; a mismatch
        // must be reported without ever looking at them.
        let mut blob = encode_blob(&PrivateHeader::new(&key(b"other")), &sample()).unwrap();
        blob[PRIVATE_HEADER_SIZE..MIN_BLOB_SIZE].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = check_header(&blob, &key(b"p")).unwrap_err();
        assert!(matches!(err, CacheError::PlatformMismatch { .. }));
    }

    #[test]
    fn oversized_count_rejected() {
        let mut blob = encode_blob(&PrivateHeader::new(&key(b"p")), &sample()).unwrap();
        blob[PRIVATE_HEADER_SIZE..MIN_BLOB_SIZE].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            parse_blob(&blob),
            Err(CacheError::InvalidBlob { .. })
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let blob = encode_blob(&PrivateHeader::new(&key(b"p")), &sample()).unwrap();
        let truncated = &blob[..blob.len() - 1];
        assert!(matches!(
            parse_blob(truncated),
            Err(CacheError::InvalidBlob { .. })
        ));
    }

    #[test]
    fn empty_blob_is_valid() {
        let blob = encode_blob::<Vec<u8>>(&PrivateHeader::new(&key(b"p")), &[]).unwrap();
        assert_eq!(blob.len(), MIN_BLOB_SIZE);
        assert!(validate_blob(&blob, &key(b"p")).unwrap().entries.is_empty());
    }
}
