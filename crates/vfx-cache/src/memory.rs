//! Memory detection and budgeting.
//!
//! Provides system memory detection and environment variable overrides
//! for the cache budgets.
//!
//! # Environment Variables
//!
//! - `VFX_CACHE_RAM_MB` - Explicit RAM cache budget in megabytes
//! - `VFX_CACHE_RAM_PCT` - RAM cache budget as percentage of available memory (1-100)
//! - `VFX_CACHE_GPU_MB` - Texture cache budget in megabytes
//! - `VFX_CACHE_DISK_MB` - Disk cache budget in megabytes
//! - `VFX_CACHE_DIR` - Directory of the disk cache segments

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Default share of available memory given to the RAM cache.
pub const DEFAULT_RAM_FRACTION: f64 = 0.25;

/// Default safety margin - consider at most 80% of system memory available.
pub const SAFE_MEMORY_FRACTION: f64 = 0.80;

/// Default texture cache budget.
pub const DEFAULT_TEXTURE_BYTES: u64 = 512 * MB;

/// Default disk cache budget.
pub const DEFAULT_DISK_BYTES: u64 = 4 * 1024 * MB;

const MB: u64 = 1024 * 1024;

static SYSTEM_MEMORY: OnceLock<u64> = OnceLock::new();

/// Detect total system RAM in bytes.
pub fn system_memory() -> u64 {
    *SYSTEM_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(8 * 1024 * MB) // 8 GB fallback
    })
}

/// Usable RAM: 80% of system memory.
pub fn available_memory() -> u64 {
    (system_memory() as f64 * SAFE_MEMORY_FRACTION) as u64
}

/// RAM cache budget.
///
/// Priority:
/// 1. `VFX_CACHE_RAM_MB` - explicit MB limit
/// 2. `VFX_CACHE_RAM_PCT` - percentage of available memory
/// 3. Default: 25% of available memory
pub fn ram_budget() -> u64 {
    if let Some(mb) = env_u64("VFX_CACHE_RAM_MB") {
        return mb * MB;
    }
    match env_u64("VFX_CACHE_RAM_PCT") {
        Some(pct) => available_memory() * pct.clamp(1, 100) / 100,
        None => (available_memory() as f64 * DEFAULT_RAM_FRACTION) as u64,
    }
}

/// Texture cache budget, `VFX_CACHE_GPU_MB` or 512 MB.
pub fn texture_budget() -> u64 {
    env_u64("VFX_CACHE_GPU_MB").map(|mb| mb * MB).unwrap_or(DEFAULT_TEXTURE_BYTES)
}

/// Disk cache budget, `VFX_CACHE_DISK_MB` or 4 GB.
pub fn disk_budget() -> u64 {
    env_u64("VFX_CACHE_DISK_MB").map(|mb| mb * MB).unwrap_or(DEFAULT_DISK_BYTES)
}

/// Disk cache directory from `VFX_CACHE_DIR`.
pub fn disk_dir_override() -> Option<PathBuf> {
    env::var_os("VFX_CACHE_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * MB {
        format!("{:.2} GB", bytes as f64 / (1024.0 * MB as f64))
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
