//! `pipecache merge`: combine serialized blobs from the same platform.

use std::collections::HashSet;

use pipecache::blob;
use pipecache::CacheError;
use pipecache_common::CacheId;
use tracing::debug;

use crate::{GlobalArgs, MergeArgs};

/// Runs the `pipecache merge` command.
pub fn run(args: &MergeArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let inputs = args
        .blobs
        .iter()
        .map(|path| std::fs::read(path).map_err(|e| format!("{}: {e}", path.display())))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(inputs = inputs.len(), "read input blobs");

    let (merged, entries) = merge_blobs(&inputs)?;
    std::fs::write(&args.output, &merged)?;

    if !global.quiet {
        eprintln!(
            "   Merged {} blob(s), {entries} entries, into {}",
            inputs.len(),
            args.output.display()
        );
    }
    Ok(())
}

/// Merges `inputs` into one blob stamped with the first input's platform.
///
/// Every input is validated before anything is merged; one that is malformed
/// or from another platform fails the whole merge. For keys present in more
/// than one input the earliest input wins. Returns the blob and its entry
/// count.
pub fn merge_blobs(inputs: &[Vec<u8>]) -> Result<(Vec<u8>, usize), CacheError> {
    let first = inputs.first().ok_or_else(|| CacheError::InvalidBlob {
        reason: "no blobs to merge".to_string(),
    })?;
    let header = blob::read_header(first)?;
    let key = header.platform_key();

    let parsed = inputs
        .iter()
        .map(|data| blob::validate_blob(data, &key))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut entries: Vec<(CacheId, &[u8])> = Vec::new();
    for source in &parsed {
        for (entry, payload) in &source.entries {
            if seen.insert(entry.hash_id) {
                entries.push((entry.hash_id, *payload));
            }
        }
    }

    let count = entries.len();
    Ok((blob::encode_blob(&header, &entries)?, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipecache::PrivateHeader;
    use pipecache_common::PlatformKey;

    fn key(tag: &[u8]) -> PlatformKey {
        PlatformKey::from(CacheId::from_data(tag))
    }

    fn make(platform: &[u8], entries: &[(&str, &str)]) -> Vec<u8> {
        let entries: Vec<(CacheId, &[u8])> = entries
            .iter()
            .map(|(k, v)| (CacheId::from_data(k.as_bytes()), v.as_bytes()))
            .collect();
        blob::encode_blob(&PrivateHeader::new(&key(platform)), &entries).unwrap()
    }

    #[test]
    fn earlier_blob_wins() {
        let a = make(b"gpu", &[("k", "first"), ("a", "1")]);
        let b = make(b"gpu", &[("k", "second"), ("b", "2")]);
        let (merged, count) = merge_blobs(&[a, b]).unwrap();
        assert_eq!(count, 3);

        let parsed = blob::validate_blob(&merged, &key(b"gpu")).unwrap();
        let k = parsed
            .entries
            .iter()
            .find(|(e, _)| e.hash_id == CacheId::from_data(b"k"))
            .unwrap();
        assert_eq!(k.1, b"first");
    }

    #[test]
    fn foreign_blob_rejects_merge() {
        let a = make(b"gpu", &[("a", "1")]);
        let b = make(b"other gpu", &[("b", "2")]);
        assert!(matches!(
            merge_blobs(&[a, b]),
            Err(CacheError::PlatformMismatch { .. })
        ));
    }

    #[test]
    fn nothing_to_merge() {
        assert!(merge_blobs(&[]).is_err());
    }

    #[test]
    fn writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, make(b"gpu", &[("a", "1")])).unwrap();
        std::fs::write(&b, make(b"gpu", &[("b", "2")])).unwrap();
        let output = dir.path().join("merged.bin");

        let args = MergeArgs {
            output: output.clone(),
            blobs: vec![a, b],
        };
        run(&args, &GlobalArgs { quiet: true }).unwrap();

        let merged = std::fs::read(&output).unwrap();
        assert_eq!(
            blob::validate_blob(&merged, &key(b"gpu")).unwrap().entries.len(),
            2
        );
    }
}
