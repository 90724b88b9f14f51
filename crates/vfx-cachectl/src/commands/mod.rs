//! CLI command implementations

pub mod info;
pub mod list;
pub mod purge;

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use vfx_cache::TileSegment;

/// Segment files of a cache directory, sorted by name.
pub fn segment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read: {}", dir.display()))? {
        let path = entry?.path();
        let is_segment = path.extension().is_some_and(|e| e == "seg")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("tiles_"));
        if is_segment {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Opens every segment of `dir`. Fails when there is none.
pub fn open_segments(dir: &Path) -> Result<Vec<TileSegment>> {
    let paths = segment_paths(dir)?;
    if paths.is_empty() {
        bail!("no tile segments in {}", dir.display());
    }
    paths
        .iter()
        .map(|p| TileSegment::open_existing(p).with_context(|| format!("Failed to open: {}", p.display())))
        .collect()
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
