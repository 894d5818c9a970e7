//! `pipecache inspect`: print a serialized blob's header and entries.

use pipecache::blob;
use pipecache::CacheError;
use serde_json::json;

use crate::{InspectArgs, ReportFormat};

/// Runs the `pipecache inspect` command.
pub fn run(args: &InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(&args.blob)?;
    print!("{}", render(&data, args.format)?);
    Ok(())
}

/// Formats the contents of `data`. Fails if the blob is malformed.
pub fn render(data: &[u8], format: ReportFormat) -> Result<String, CacheError> {
    let parsed = blob::parse_blob(data)?;
    let platform = parsed.header.platform_key();

    let out = match format {
        ReportFormat::Text => {
            let mut out = format!(
                "platform: {platform}\nentries:  {}\n",
                parsed.entries.len()
            );
            for (entry, _) in &parsed.entries {
                out.push_str(&format!("  {}  {} bytes\n", entry.hash_id, entry.data_size));
            }
            out
        }
        ReportFormat::Json => {
            let entries: Vec<_> = parsed
                .entries
                .iter()
                .map(|(entry, _)| {
                    json!({ "id": entry.hash_id.to_string(), "size": entry.data_size })
                })
                .collect();
            let doc = json!({
                "platform": platform.to_string(),
                "entry_count": entries.len(),
                "entries": entries,
            });
            format!("{doc:#}\n")
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipecache::PrivateHeader;
    use pipecache_common::{CacheId, PlatformKey};

    fn sample() -> (PlatformKey, CacheId, Vec<u8>) {
        let key = PlatformKey::from(CacheId::from_data(b"gpu"));
        let id = CacheId::from_data(b"pipe");
        let data =
            blob::encode_blob(&PrivateHeader::new(&key), &[(id, b"ABCD".to_vec())]).unwrap();
        (key, id, data)
    }

    #[test]
    fn text_lists_entries() {
        let (key, id, data) = sample();
        let out = render(&data, ReportFormat::Text).unwrap();
        assert!(out.contains(&key.to_string()));
        assert!(out.contains("entries:  1"));
        assert!(out.contains(&format!("{id}  4 bytes")));
    }

    #[test]
    fn json_is_parseable() {
        let (_, id, data) = sample();
        let out = render(&data, ReportFormat::Json).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc["entry_count"], 1);
        assert_eq!(doc["entries"][0]["id"], id.to_string());
        assert_eq!(doc["entries"][0]["size"], 4);
    }

    #[test]
    fn malformed_blob_fails() {
        assert!(render(b"short", ReportFormat::Text).is_err());
    }
}
