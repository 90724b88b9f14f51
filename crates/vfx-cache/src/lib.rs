//! # vfx-cache
//!
//! Tile cache engine and pixel storage backends.
//!
//! - [`TileKey`] - Composite identity of a cached tile
//! - [`StorageBuffer`] - Host RAM, disk segment or GPU texture storage
//! - [`Cache`] - Thread-safe key to buffer store with at-most-once computation
//! - [`CacheEntryLock`] - Per-key handle: cached, must-compute or pending
//! - [`TileSegment`] - Memory-mapped, versioned on-disk tile store
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vfx_cache::{Cache, LockStatus, SampleLayout, StorageBuffer, TileKey};
//! use vfx_core::{BitDepth, RectI, RenderScale};
//!
//! let cache = Cache::in_memory(64 * 1024 * 1024);
//! let key = TileKey::new(0xabc, 1.0, 0, "Color.RGBA", RenderScale::IDENTITY, BitDepth::Float);
//!
//! let mut lock = cache.get(&key);
//! assert_eq!(lock.status(), LockStatus::MustCompute);
//! let buffer = StorageBuffer::allocate_ram(RectI::from_size(64, 64), BitDepth::Float, 4, SampleLayout::Packed)?;
//! lock.insert_in_cache(Arc::new(buffer))?;
//!
//! assert_eq!(cache.get(&key).status(), LockStatus::Cached);
//! # Ok::<(), vfx_core::Error>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod key;
pub mod lock;
mod lru;
pub mod memory;
mod release;
pub mod segment;
pub mod storage;

pub use config::{CacheConfig, DiskCacheConfig};
pub use engine::{Cache, CacheStats};
pub use key::TileKey;
pub use lock::{CacheEntryLock, LockStatus, WaitOutcome};
pub use release::release_in_background;
pub use segment::{SegmentGeometry, SegmentInfo, TileSegment};
pub use storage::{
    DiskTile, GpuTexture, HostTextureContext, MaskMixParams, PixelStorage, RamBuffer, SampleLayout,
    SampleReadGuard, SampleWriteGuard, StorageBuffer, StorageMode, TextureContext, TextureId,
    tile_size_for_depth,
};
