//! Purge command.

use super::open_segments;
use crate::PurgeArgs;
use anyhow::{Context, Result};
use tracing::info;

/// Marks every ready record free. Payloads are left in place.
///
/// Segments with attached caches are refused unless `--force` is given.
pub fn run(args: PurgeArgs) -> Result<()> {
    let mut total = 0usize;
    for segment in open_segments(&args.dir)? {
        let path = segment.path().display().to_string();
        let count = if args.dry_run {
            segment.ready_keys().len()
        } else {
            segment
                .purge(args.force)
                .with_context(|| format!("Failed to purge: {path}"))?
        };
        info!(path = %path, records = count, dry_run = args.dry_run, "segment records");
        total += count;
    }
    if args.dry_run {
        println!("{total} record(s) would be purged");
    } else {
        println!("{total} record(s) purged");
    }
    Ok(())
}
