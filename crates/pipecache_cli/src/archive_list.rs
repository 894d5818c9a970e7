//! `pipecache archive-list`: list an archive file's records.

use pipecache_layers::{ArchiveSummary, FileArchive};
use serde_json::json;
use tracing::debug;

use crate::{ArchiveListArgs, ReportFormat};

/// Runs the `pipecache archive-list` command.
pub fn run(args: &ArchiveListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let summary = FileArchive::inspect(&args.file)?;
    debug!(path = %args.file.display(), records = summary.records.len(), "archive scanned");
    print!("{}", render(&summary, args.format));
    Ok(())
}

/// Formats an archive listing.
pub fn render(summary: &ArchiveSummary, format: ReportFormat) -> String {
    let header = &summary.header;
    match format {
        ReportFormat::Text => {
            let mut out = format!(
                "platform: {}\nversion:  {}\nrecords:  {}\n",
                header.platform_key,
                header.format_version,
                summary.records.len()
            );
            for (id, size) in &summary.records {
                out.push_str(&format!("  {id}  {size} bytes\n"));
            }
            out
        }
        ReportFormat::Json => {
            let records: Vec<_> = summary
                .records
                .iter()
                .map(|(id, size)| json!({ "id": id.to_string(), "size": size }))
                .collect();
            let doc = json!({
                "platform": header.platform_key.to_string(),
                "format_version": header.format_version,
                "records": records,
            });
            format!("{doc:#}\n")
        }
    }
}
