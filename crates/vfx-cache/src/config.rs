//! Cache configuration.

use std::path::PathBuf;

use crate::memory;

/// Disk cache settings.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Directory holding one segment file per sample width.
    pub dir: PathBuf,
    /// Total payload budget across segments.
    pub max_bytes: u64,
    /// Recreate segments whose layout does not match instead of failing.
    pub recreate_on_mismatch: bool,
}

impl DiskCacheConfig {
    /// Disk cache in `dir` with the default budget.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: memory::DEFAULT_DISK_BYTES,
            recreate_on_mismatch: true,
        }
    }

    /// Sets the payload budget.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Configuration of a [`Cache`](crate::Cache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget of host-memory entries.
    pub max_ram_bytes: u64,
    /// Byte budget of texture entries.
    pub max_texture_bytes: u64,
    /// Disk cache, `None` disables disk storage.
    pub disk: Option<DiskCacheConfig>,
    /// Free released buffers on a background thread.
    pub release_in_background: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_ram_bytes: memory::ram_budget(),
            max_texture_bytes: memory::texture_budget(),
            disk: None,
            release_in_background: true,
        }
    }
}

impl CacheConfig {
    /// RAM-only configuration with an explicit budget.
    pub fn with_ram_budget(max_ram_bytes: u64) -> Self {
        Self {
            max_ram_bytes,
            ..Self::default()
        }
    }

    /// Defaults plus environment overrides, see [`memory`].
    ///
    /// `VFX_CACHE_DIR` enables the disk cache with `VFX_CACHE_DISK_MB`
    /// as its budget.
    pub fn from_env() -> Self {
        let disk = memory::disk_dir_override()
            .map(|dir| DiskCacheConfig::new(dir).with_max_bytes(memory::disk_budget()));
        Self { disk, ..Self::default() }
    }

    /// Enables the disk cache.
    pub fn with_disk(mut self, disk: DiskCacheConfig) -> Self {
        self.disk = Some(disk);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let cfg = CacheConfig::with_ram_budget(1024).with_disk(DiskCacheConfig::new("/tmp/x").with_max_bytes(10));
        assert_eq!(cfg.max_ram_bytes, 1024);
        let disk = cfg.disk.unwrap();
        assert_eq!(disk.max_bytes, 10);
        assert!(disk.recreate_on_mismatch);
    }

    #[test]
    fn test_default_has_budget() {
        let cfg = CacheConfig::default();
        assert!(cfg.max_ram_bytes > 0);
        assert!(cfg.release_in_background);
    }
}
