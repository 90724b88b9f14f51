//! Disk-backed single-channel tiles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vfx_core::{BitDepth, RectI, Result, SamplesMut, SamplesRef};

use super::{PixelStorage, StorageMode};
use crate::key::TileKey;
use crate::segment::{SegmentGeometry, TileSegment};

/// Tile width and height used by disk-backed storage at `depth`.
///
/// Every channel tile holds 64 KiB of samples.
pub const fn tile_size_for_depth(depth: BitDepth) -> (i32, i32) {
    match depth {
        BitDepth::Byte => (256, 256),
        BitDepth::Short | BitDepth::Half => (256, 128),
        BitDepth::Float => (128, 128),
    }
}

/// Segment geometry used for `depth`.
pub const fn geometry_for_depth(depth: BitDepth) -> SegmentGeometry {
    let (w, h) = tile_size_for_depth(depth);
    SegmentGeometry {
        bytes_per_sample: depth.bytes_per_sample() as u32,
        tile_width: w as u32,
        tile_height: h as u32,
    }
}

/// One channel of one tile, stored in a slot of a [`TileSegment`].
///
/// The slot returns to the segment when the tile drops, unless the tile
/// was published and is still owned by the cache's persisted index.
pub struct DiskTile {
    segment: Arc<TileSegment>,
    slot: u32,
    bounds: RectI,
    depth: BitDepth,
    access: RwLock<()>,
    published: AtomicBool,
}

impl std::fmt::Debug for DiskTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTile")
            .field("slot", &self.slot)
            .field("bounds", &self.bounds)
            .field("depth", &self.depth)
            .field("published", &self.is_published())
            .finish()
    }
}

/// Shared sample access to a disk tile.
pub struct DiskReadGuard<'a> {
    _access: RwLockReadGuard<'a, ()>,
    samples: SamplesRef<'a>,
}

impl DiskReadGuard<'_> {
    /// Samples of the tile.
    pub fn samples(&self) -> SamplesRef<'_> {
        self.samples
    }
}

/// Exclusive sample access to a disk tile.
pub struct DiskWriteGuard<'a> {
    _access: RwLockWriteGuard<'a, ()>,
    samples: SamplesMut<'a>,
}

impl DiskWriteGuard<'_> {
    /// Samples of the tile.
    pub fn samples(&self) -> SamplesRef<'_> {
        self.samples.as_ref()
    }

    /// Mutable samples of the tile.
    pub fn samples_mut(&mut self) -> SamplesMut<'_> {
        self.samples.reborrow()
    }
}

impl DiskTile {
    /// Wraps a freshly allocated slot. Its payload is zeroed.
    pub(crate) fn new(segment: Arc<TileSegment>, slot: u32, bounds: RectI, depth: BitDepth) -> Self {
        let tile = Self::adopt(segment, slot, bounds, depth, false);
        let (ptr, len) = tile.segment.payload(slot);
        // SAFETY: the slot was just claimed for this tile.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, len) };
        tile
    }

    /// Wraps a slot whose payload is already valid.
    pub(crate) fn adopt(
        segment: Arc<TileSegment>,
        slot: u32,
        bounds: RectI,
        depth: BitDepth,
        published: bool,
    ) -> Self {
        debug_assert_eq!(depth.bytes_per_sample() as u32, segment.geometry().bytes_per_sample);
        Self {
            segment,
            slot,
            bounds,
            depth,
            access: RwLock::new(()),
            published: AtomicBool::new(published),
        }
    }

    /// Cell rectangle of a grid tile at the given depth.
    pub fn cell_bounds(depth: BitDepth, tile_x: i32, tile_y: i32) -> RectI {
        let (w, h) = tile_size_for_depth(depth);
        RectI::new(tile_x * w, tile_y * h, (tile_x + 1) * w, (tile_y + 1) * h)
    }

    /// Slot index in the segment.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Whether the tile is recorded in the segment's index.
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, key: &TileKey) -> bool {
        let ok = self.segment.publish(self.slot, key);
        self.published.store(ok, Ordering::Release);
        ok
    }

    pub(crate) fn unpublish(&self) {
        if self.published.swap(false, Ordering::AcqRel) {
            self.segment.unpublish(self.slot);
        }
    }

    /// Shared access to the samples.
    pub fn read(&self) -> Result<DiskReadGuard<'_>> {
        let access = self.access.read().unwrap_or_else(PoisonError::into_inner);
        let (ptr, len) = self.segment.payload(self.slot);
        // SAFETY: the slot belongs to this tile and writers hold `access`.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
        Ok(DiskReadGuard {
            _access: access,
            samples: SamplesRef::from_bytes(self.depth, bytes)?,
        })
    }

    /// Exclusive access to the samples.
    pub fn write(&self) -> Result<DiskWriteGuard<'_>> {
        let access = self.access.write().unwrap_or_else(PoisonError::into_inner);
        let (ptr, len) = self.segment.payload(self.slot);
        // SAFETY: the slot belongs to this tile and `access` is exclusive.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        Ok(DiskWriteGuard {
            _access: access,
            samples: SamplesMut::from_bytes(self.depth, bytes)?,
        })
    }
}

impl PixelStorage for DiskTile {
    fn mode(&self) -> StorageMode {
        StorageMode::Disk
    }

    fn bounds(&self) -> RectI {
        self.bounds
    }

    fn bit_depth(&self) -> BitDepth {
        self.depth
    }

    fn num_components(&self) -> usize {
        1
    }

    fn size_bytes(&self) -> u64 {
        self.segment.geometry().slot_bytes() as u64
    }
}

impl Drop for DiskTile {
    fn drop(&mut self) {
        if !self.published.load(Ordering::Acquire) {
            self.segment.release_slot(self.slot);
        }
    }
}
