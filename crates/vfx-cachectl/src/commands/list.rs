//! Ready record listing.

use super::open_segments;
use crate::ListArgs;
use anyhow::Result;
use vfx_cache::TileKey;

/// Prints the ready keys of every segment.
pub fn run(args: ListArgs) -> Result<()> {
    for segment in open_segments(&args.dir)? {
        let keys = select(segment.ready_keys(), args.channel.as_deref(), args.limit);
        println!("{} ({} shown)", segment.path().display(), keys.len());
        for (slot, key) in keys {
            println!("  [{slot:>6}] {key}");
        }
    }
    Ok(())
}

fn select(keys: Vec<(u32, TileKey)>, channel: Option<&str>, limit: Option<usize>) -> Vec<(u32, TileKey)> {
    keys.into_iter()
        .filter(|(_, k)| channel.is_none_or(|c| k.channel().starts_with(c)))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
