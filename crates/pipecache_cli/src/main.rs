//! pipecache: offline tooling for pipeline binary caches.
//!
//! Provides `pipecache inspect` to list the contents of a serialized cache
//! blob, `pipecache merge` to combine several blobs into one, and
//! `pipecache archive-list` to list the records of an archive file.

#![warn(missing_docs)]

mod archive_list;
mod inspect;
mod merge;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// pipecache: inspect and combine pipeline binary caches.
#[derive(Parser, Debug)]
#[command(name = "pipecache", version, about = "Pipeline binary cache tooling")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the header and entries of a serialized cache blob.
    Inspect(InspectArgs),
    /// Merge serialized blobs that share a platform into one blob.
    Merge(MergeArgs),
    /// List the records of an archive file.
    ArchiveList(ArchiveListArgs),
}

/// Arguments for `pipecache inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Blob file to read.
    pub blob: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for `pipecache merge`.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Where to write the merged blob.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Blobs to merge. Earlier blobs win for keys present in several.
    #[arg(required = true, num_args = 1..)]
    pub blobs: Vec<PathBuf>,
}

/// Arguments for `pipecache archive-list`.
#[derive(Parser, Debug)]
pub struct ArchiveListArgs {
    /// Archive file to list.
    pub file: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

fn log_filter(quiet: bool, verbose: u8) -> EnvFilter {
    if quiet {
        return EnvFilter::new("pipecache=error");
    }
    match verbose {
        0 => EnvFilter::new("pipecache=warn"),
        1 => EnvFilter::new("pipecache=info"),
        _ => EnvFilter::new("pipecache=debug"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.quiet, cli.verbose))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let global = GlobalArgs { quiet: cli.quiet };
    let result = match cli.command {
        Command::Inspect(ref args) => inspect::run(args),
        Command::Merge(ref args) => merge::run(args, &global),
        Command::ArchiveList(ref args) => archive_list::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
