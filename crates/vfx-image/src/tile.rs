//! Tiles and their per-channel buffers.

use std::sync::Arc;

use smallvec::SmallVec;
use vfx_cache::{
    Cache, CacheEntryLock, GpuTexture, LockStatus, PixelStorage, SampleLayout, StorageBuffer, StorageMode,
    TextureContext,
};
use vfx_core::{BitDepth, Error, RectI, Result};

use crate::access::{ChannelMap, LockedTile, LockedTileMut};

/// Arguments of an allocation postponed until first use.
///
/// Consumed exactly once by [`realize`](Self::realize).
#[derive(Debug, Clone)]
pub enum AllocationSpec {
    /// Host buffer.
    Ram {
        /// Covered pixels.
        bounds: RectI,
        /// Sample type.
        depth: BitDepth,
        /// Channels per pixel.
        components: usize,
        /// Interleaved or planar.
        layout: SampleLayout,
    },
    /// Slot of the cache's disk segment for `depth`.
    Disk {
        /// Grid cell of the tile.
        bounds: RectI,
        /// Sample type.
        depth: BitDepth,
    },
    /// RGBA float texture.
    Texture {
        /// Covered pixels.
        bounds: RectI,
        /// Owning context.
        context: Arc<dyn TextureContext>,
    },
}

impl AllocationSpec {
    /// Bounds of the buffer to allocate.
    pub fn bounds(&self) -> RectI {
        match self {
            Self::Ram { bounds, .. } | Self::Disk { bounds, .. } | Self::Texture { bounds, .. } => *bounds,
        }
    }

    /// Storage kind of the buffer to allocate.
    pub fn mode(&self) -> StorageMode {
        match self {
            Self::Ram { .. } => StorageMode::Ram,
            Self::Disk { .. } => StorageMode::Disk,
            Self::Texture { .. } => StorageMode::Texture,
        }
    }

    /// Allocates the buffer. Disk tiles need a cache with a disk segment.
    pub fn realize(self, cache: Option<&Cache>) -> Result<Arc<StorageBuffer>> {
        match self {
            Self::Ram {
                bounds,
                depth,
                components,
                layout,
            } => Ok(Arc::new(StorageBuffer::allocate_ram(bounds, depth, components, layout)?)),
            Self::Disk { bounds, depth } => cache
                .ok_or_else(|| Error::incompatible_storage("disk tiles need a cache"))?
                .allocate_disk_tile(depth, bounds),
            Self::Texture { bounds, context } => Ok(Arc::new(GpuTexture::allocate(context, bounds)?.into())),
        }
    }

    /// Whether a cached `buffer` can stand in for this allocation over `needed`.
    pub(crate) fn accepts(&self, buffer: &StorageBuffer, needed: &RectI) -> bool {
        buffer.bounds().contains(needed) && self.compatible(buffer)
    }

    /// Whether `buffer` has the sample type and arrangement of this allocation.
    pub(crate) fn compatible(&self, buffer: &StorageBuffer) -> bool {
        match self {
            Self::Ram {
                depth,
                components,
                layout,
                ..
            } => {
                buffer.is_cpu_accessible()
                    && buffer.bit_depth() == *depth
                    && buffer.num_components() == *components
                    && (*components == 1 || buffer.layout() == *layout)
            }
            Self::Disk { depth, .. } => {
                buffer.is_cpu_accessible() && buffer.bit_depth() == *depth && buffer.num_components() == 1
            }
            Self::Texture { .. } => buffer.as_texture().is_some(),
        }
    }
}

/// One buffer of a tile with its cache lock.
#[derive(Debug)]
pub struct MonoChannelTile {
    pub(crate) channel: Option<usize>,
    pub(crate) spec: AllocationSpec,
    pub(crate) buffer: Option<Arc<StorageBuffer>>,
    pub(crate) lock: Option<CacheEntryLock>,
    pub(crate) initialized: bool,
}

impl MonoChannelTile {
    pub(crate) fn new(channel: Option<usize>, spec: AllocationSpec) -> Self {
        Self {
            channel,
            spec,
            buffer: None,
            lock: None,
            initialized: false,
        }
    }

    /// Channel held by the buffer, `-1` when it holds all channels.
    pub fn channel_index(&self) -> i32 {
        self.channel.map_or(-1, |c| c as i32)
    }

    /// Backing buffer once allocated.
    pub fn buffer(&self) -> Option<&Arc<StorageBuffer>> {
        self.buffer.as_ref()
    }

    /// Allocation used when the buffer is realized.
    pub fn allocation(&self) -> &AllocationSpec {
        &self.spec
    }

    /// Whether storage exists.
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether the cache lookup (or allocation) ran. Buffers skipped by an
    /// abort during creation stay uninitialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Status of the cache lock still held for this buffer.
    pub fn lock_status(&self) -> Option<LockStatus> {
        self.lock.as_ref().map(CacheEntryLock::status)
    }

    pub(crate) fn realize(&mut self, cache: Option<&Cache>) -> Result<()> {
        if self.buffer.is_none() {
            self.buffer = Some(self.spec.clone().realize(cache)?);
        }
        Ok(())
    }

    /// Installs `buffer`, returning the previous one.
    pub(crate) fn replace_buffer(&mut self, buffer: Arc<StorageBuffer>) -> Option<Arc<StorageBuffer>> {
        self.buffer.replace(buffer)
    }
}

/// Rectangular piece of an image.
#[derive(Debug)]
pub struct Tile {
    pub(crate) bounds: RectI,
    pub(crate) grid: (i32, i32),
    pub(crate) channels: SmallVec<[MonoChannelTile; 4]>,
}

impl Tile {
    /// Pixel bounds, clipped to the image.
    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    /// Grid coordinates used in cache keys.
    pub fn grid_index(&self) -> (i32, i32) {
        self.grid
    }

    /// Buffers of the tile.
    pub fn channels(&self) -> &[MonoChannelTile] {
        &self.channels
    }

    /// Whether some buffer still has to be computed by the holder, or was
    /// never looked up.
    pub fn needs_compute(&self) -> bool {
        self.channels
            .iter()
            .any(|m| !m.initialized || m.lock_status() == Some(LockStatus::MustCompute))
    }

    /// Whether some buffer is being computed by another party.
    pub fn is_pending(&self) -> bool {
        self.channels
            .iter()
            .any(|m| m.lock_status() == Some(LockStatus::ComputationPending))
    }

    /// Whether every buffer is allocated.
    pub fn is_allocated(&self) -> bool {
        self.channels.iter().all(MonoChannelTile::is_allocated)
    }

    pub(crate) fn realize(&mut self, cache: Option<&Cache>) -> Result<()> {
        self.channels.iter_mut().try_for_each(|m| m.realize(cache))
    }

    pub(crate) fn channel_map(&self, components: usize) -> ChannelMap {
        let mut map: ChannelMap = [None; 4];
        match self.channels.as_slice() {
            [single] if single.channel.is_none() => {
                for (c, slot) in map.iter_mut().enumerate().take(components) {
                    *slot = Some((0, c));
                }
            }
            all => {
                for (i, m) in all.iter().enumerate() {
                    if let Some(c) = m.channel.filter(|c| *c < 4) {
                        map[c] = Some((i, 0));
                    }
                }
            }
        }
        map
    }

    fn buffers(&self) -> Result<SmallVec<[&StorageBuffer; 4]>> {
        self.channels
            .iter()
            .map(|m| m.buffer().map(|b| b.as_ref()).ok_or(Error::NotAllocated))
            .collect()
    }

    pub(crate) fn lock_read(&self, components: usize) -> Result<LockedTile<'_>> {
        LockedTile::lock(&self.buffers()?, self.channel_map(components))
    }

    pub(crate) fn lock_write(&self, components: usize) -> Result<LockedTileMut<'_>> {
        LockedTileMut::lock(&self.buffers()?, self.channel_map(components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram_spec(bounds: RectI, components: usize) -> AllocationSpec {
        AllocationSpec::Ram {
            bounds,
            depth: BitDepth::Byte,
            components,
            layout: SampleLayout::Packed,
        }
    }

    #[test]
    fn test_realize_once() {
        let bounds = RectI::from_size(4, 4);
        let mut mono = MonoChannelTile::new(None, ram_spec(bounds, 3));
        assert!(!mono.is_allocated());
        assert_eq!(mono.allocation().mode(), StorageMode::Ram);
        mono.realize(None).unwrap();
        let first = mono.buffer().unwrap().clone();
        mono.realize(None).unwrap();
        assert!(Arc::ptr_eq(&first, mono.buffer().unwrap()));
        assert_eq!(mono.channel_index(), -1);
    }

    #[test]
    fn test_disk_spec_needs_cache() {
        let spec = AllocationSpec::Disk {
            bounds: RectI::from_size(256, 256),
            depth: BitDepth::Byte,
        };
        assert!(spec.realize(None).is_err());
    }

    #[test]
    fn test_accepts() {
        let bounds = RectI::from_size(4, 4);
        let spec = ram_spec(bounds, 3);
        let same = StorageBuffer::allocate_ram(bounds, BitDepth::Byte, 3, SampleLayout::Packed).unwrap();
        let planar = StorageBuffer::allocate_ram(bounds, BitDepth::Byte, 3, SampleLayout::Planar).unwrap();
        let small = StorageBuffer::allocate_ram(RectI::from_size(2, 2), BitDepth::Byte, 3, SampleLayout::Packed)
            .unwrap();
        assert!(spec.accepts(&same, &bounds));
        assert!(!spec.accepts(&planar, &bounds));
        assert!(!spec.accepts(&small, &bounds));
    }

    #[test]
    fn test_channel_maps() {
        let bounds = RectI::from_size(2, 2);
        let packed = Tile {
            bounds,
            grid: (0, 0),
            channels: smallvec::smallvec![MonoChannelTile::new(None, ram_spec(bounds, 3))],
        };
        assert_eq!(packed.channel_map(3), [Some((0, 0)), Some((0, 1)), Some((0, 2)), None]);

        let mono = Tile {
            bounds,
            grid: (0, 0),
            channels: smallvec::smallvec![
                MonoChannelTile::new(Some(1), ram_spec(bounds, 1)),
                MonoChannelTile::new(Some(3), ram_spec(bounds, 1)),
            ],
        };
        assert_eq!(mono.channel_map(4), [None, Some((0, 0)), None, Some((1, 0))]);
        assert!(matches!(mono.lock_read(4), Err(Error::NotAllocated)));
    }

    #[test]
    fn test_uninitialized_tile_needs_compute() {
        let bounds = RectI::from_size(2, 2);
        let mut tile = Tile {
            bounds,
            grid: (0, 0),
            channels: smallvec::smallvec![MonoChannelTile::new(None, ram_spec(bounds, 3))],
        };
        assert!(tile.needs_compute());
        tile.channels[0].initialized = true;
        assert!(!tile.needs_compute());
        assert!(!tile.is_pending());
    }
}
