//! Segment info command.

use super::{format_size, open_segments};
use crate::InfoArgs;
use anyhow::Result;
use vfx_cache::SegmentInfo;

/// Prints geometry and occupancy of every segment in the directory.
pub fn run(args: InfoArgs) -> Result<()> {
    let segments = open_segments(&args.dir)?;
    let mut total_bytes = 0u64;
    let mut total_ready = 0usize;
    for segment in &segments {
        let info = segment.info();
        let ready = segment.ready_keys().len();
        print!("{}", describe(&info, ready));
        total_bytes += info.file_bytes;
        total_ready += ready;
    }
    println!(
        "{} segment(s), {} ready tile(s), {} on disk",
        segments.len(),
        total_ready,
        format_size(total_bytes)
    );
    Ok(())
}

fn describe(info: &SegmentInfo, ready: usize) -> String {
    let g = info.geometry;
    let occupancy = if info.slot_count == 0 {
        0.0
    } else {
        info.used_slots as f64 * 100.0 / info.slot_count as f64
    };
    format!(
        "{}\n  Tile:      {}x{}, {} byte(s) per sample\n  Slot size: {}\n  Slots:     {} used / {} ({:.1}%)\n  Ready:     {}\n  Attached:  {}\n  File size: {}\n",
        info.path.display(),
        g.tile_width,
        g.tile_height,
        g.bytes_per_sample,
        format_size(g.slot_bytes() as u64),
        info.used_slots,
        info.slot_count,
        occupancy,
        ready,
        info.attached,
        format_size(info.file_bytes),
    )
}
