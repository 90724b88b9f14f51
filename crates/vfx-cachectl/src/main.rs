//! vfx-cachectl - Inspect the on-disk tile cache
//!
//! Reads the `tiles_<n>.seg` segment files a cache directory holds.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vfx-cachectl")]
#[command(author, version, about = "Inspect and purge vfx tile cache segments")]
#[command(long_about = "
Reads the memory-mapped tile segments of a disk cache directory.
Purging is refused while a cache is attached unless --force is given.

Examples:
  vfx-cachectl info ~/.cache/vfx           # Geometry and occupancy
  vfx-cachectl list ~/.cache/vfx -c Color  # Ready tiles of the Color plane
  vfx-cachectl purge ~/.cache/vfx          # Mark every tile free
  vfx-cachectl purge ~/.cache/vfx --force  # Also reclaim slots of a dead process
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (repeat for trace logging)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show segment geometry and slot occupancy
    #[command(visible_alias = "i")]
    Info(InfoArgs),

    /// List the tiles recorded as ready
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Mark every record free
    Purge(PurgeArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// Cache directory
    dir: PathBuf,
}

#[derive(Args)]
struct ListArgs {
    /// Cache directory
    dir: PathBuf,

    /// Only keys whose channel starts with this prefix
    #[arg(short, long)]
    channel: Option<String>,

    /// Maximum records printed per segment
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct PurgeArgs {
    /// Cache directory
    dir: PathBuf,

    /// Report what would be purged without writing
    #[arg(long)]
    dry_run: bool,

    /// Purge even if caches are attached, resetting the attach count
    #[arg(short, long)]
    force: bool,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::List(args) => commands::list::run(args),
        Commands::Purge(args) => commands::purge::run(args),
    }
}
