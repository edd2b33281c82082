//! CLI argument definitions

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Footprint - estimate the size of a profile backup
#[derive(Parser, Debug)]
#[command(name = "footprint")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to footprint.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure every selected resource and report the backup footprint
    Measure(MeasureArgs),

    /// List registered resources
    Resources(ResourcesArgs),

    /// Create or remove sized fixture files
    #[command(subcommand)]
    Fixture(FixtureCommands),
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    /// Profile directory to measure
    #[arg(short, long, env = "FOOTPRINT_PROFILE_DIR", default_value = ".")]
    pub profile_dir: Utf8PathBuf,

    /// Only measure these resource keys (repeatable)
    #[arg(short, long = "include", value_name = "KEY")]
    pub include: Vec<String>,

    /// Per-resource timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Abort the pass at the first failing resource
    #[arg(long)]
    pub fail_fast: bool,

    /// Measure resources one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Report sizes rounded to the nearest 10 KB
    #[arg(long)]
    pub fuzzy: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResourcesArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum FixtureCommands {
    /// Create a zero-filled file of an exact size
    Create(FixtureCreateArgs),

    /// Remove a file or directory, ignoring absent and locked paths
    Remove(FixtureRemoveArgs),
}

#[derive(Args, Debug)]
pub struct FixtureCreateArgs {
    /// Absolute path of the file
    pub path: Utf8PathBuf,

    /// Size in kilobytes (1 KB = 1000 bytes)
    #[arg(long)]
    pub kb: u64,
}

#[derive(Args, Debug)]
pub struct FixtureRemoveArgs {
    /// Absolute path to remove
    pub path: Utf8PathBuf,
}
