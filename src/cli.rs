//! CLI argument parsing for instats

use clap::Parser;
use std::path::PathBuf;

/// Matches nothing, so nothing is excluded by default.
const MATCH_NOTHING: &str = r".^";

#[derive(Parser, Debug)]
#[command(name = "instats")]
#[command(version)]
#[command(
    about = "Count how many inlined-call and call-site arguments carry DWARF location info",
    long_about = None
)]
pub struct Cli {
    /// Flush and free parser caches after this many compilation units.
    /// Low values reduce performance, high values can cause OOM
    #[arg(long = "gc", value_name = "UNITS", default_value_t = 10_000)]
    pub gc: usize,

    /// Path of the output statistics database
    #[arg(
        short = 'o',
        long = "output",
        value_name = "PATH",
        default_value = "instats.db"
    )]
    pub output: PathBuf,

    /// Delete previously collected statistics on start
    #[arg(short = 'c', long = "clear-db")]
    pub clear_db: bool,

    /// Exclude compilation units whose source path matches the given pattern
    #[arg(
        short = 'e',
        long = "exclude",
        value_name = "REGEX",
        default_value = MATCH_NOTHING
    )]
    pub exclude: String,

    /// Exclude input files whose path matches the given pattern
    #[arg(
        short = 'E',
        long = "exclude-file",
        value_name = "REGEX",
        default_value = MATCH_NOTHING
    )]
    pub exclude_file: String,

    /// Also traverse the shared libraries linked against the inputs
    #[arg(short = 'S', long = "follow-shared")]
    pub follow_shared: bool,

    /// Enable debug tracing output
    #[arg(long)]
    pub debug: bool,

    /// Binaries to analyse
    #[arg(required = true, value_name = "INPUTS")]
    pub inputs: Vec<PathBuf>,
}
