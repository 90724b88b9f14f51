//! Pixel storage backends.
//!
//! Three interchangeable buffer kinds hold tile data:
//!
//! | Kind | Type | Components | Layout |
//! |------|------|------------|--------|
//! | Host RAM | [`RamBuffer`] | 1-4 | packed or planar |
//! | Disk segment | [`DiskTile`] | 1 | fixed-size tile cell |
//! | GPU texture | [`GpuTexture`] | 4 (RGBA f32) | packed |
//!
//! [`StorageBuffer`] is the tagged union the cache and images share through
//! `Arc`. The [`PixelStorage`] trait gives uniform access to the geometry;
//! raw samples are reached through [`StorageBuffer::read`] and
//! [`StorageBuffer::write`], which fail with [`Error::NotCpuAccessible`]
//! on textures.

mod disk;
mod ram;
mod texture;

use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use vfx_core::{BitDepth, Error, PixelData, RectI, Result, SamplesMut, SamplesRef};

pub use disk::{DiskReadGuard, DiskTile, DiskWriteGuard, geometry_for_depth, tile_size_for_depth};
pub use ram::RamBuffer;
pub use texture::{GpuTexture, HostTextureContext, MaskMixParams, TextureContext, TextureId};

/// Where a buffer's samples live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// Host memory.
    Ram,
    /// Memory-mapped disk segment.
    Disk,
    /// GPU texture.
    Texture,
}

impl StorageMode {
    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ram => "ram",
            Self::Disk => "disk",
            Self::Texture => "texture",
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Arrangement of multi-component samples in a host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleLayout {
    /// Interleaved, `RGBARGBA...`.
    #[default]
    Packed,
    /// One full plane per component, `RRR...GGG...`.
    Planar,
}

/// Geometry shared by every backend.
pub trait PixelStorage: Send + Sync {
    /// Storage kind.
    fn mode(&self) -> StorageMode;

    /// Pixel bounds covered by the buffer.
    fn bounds(&self) -> RectI;

    /// Sample depth.
    fn bit_depth(&self) -> BitDepth;

    /// Components per pixel.
    fn num_components(&self) -> usize;

    /// Bytes accounted against the cache budget.
    fn size_bytes(&self) -> u64;
}

/// A buffer of any backend.
#[derive(Debug)]
pub enum StorageBuffer {
    /// Host memory.
    Ram(RamBuffer),
    /// Disk segment slot.
    Disk(DiskTile),
    /// GPU texture.
    Texture(GpuTexture),
}

/// Shared sample access to a CPU buffer.
pub enum SampleReadGuard<'a> {
    /// Host buffer.
    Ram(RwLockReadGuard<'a, PixelData>),
    /// Disk tile.
    Disk(DiskReadGuard<'a>),
}

impl SampleReadGuard<'_> {
    /// Samples of the buffer.
    pub fn samples(&self) -> SamplesRef<'_> {
        match self {
            Self::Ram(g) => g.as_samples(),
            Self::Disk(g) => g.samples(),
        }
    }
}

/// Exclusive sample access to a CPU buffer.
pub enum SampleWriteGuard<'a> {
    /// Host buffer.
    Ram(RwLockWriteGuard<'a, PixelData>),
    /// Disk tile.
    Disk(DiskWriteGuard<'a>),
}

impl SampleWriteGuard<'_> {
    /// Samples of the buffer.
    pub fn samples(&self) -> SamplesRef<'_> {
        match self {
            Self::Ram(g) => g.as_samples(),
            Self::Disk(g) => g.samples(),
        }
    }

    /// Mutable samples of the buffer.
    pub fn samples_mut(&mut self) -> SamplesMut<'_> {
        match self {
            Self::Ram(g) => g.as_samples_mut(),
            Self::Disk(g) => g.samples_mut(),
        }
    }
}

impl StorageBuffer {
    /// Allocates a host buffer.
    pub fn allocate_ram(
        bounds: RectI,
        depth: BitDepth,
        components: usize,
        layout: SampleLayout,
    ) -> Result<Self> {
        RamBuffer::allocate(bounds, depth, components, layout).map(Self::Ram)
    }

    fn storage(&self) -> &dyn PixelStorage {
        match self {
            Self::Ram(b) => b,
            Self::Disk(b) => b,
            Self::Texture(b) => b,
        }
    }

    /// Sample arrangement; textures and disk tiles are packed.
    pub fn layout(&self) -> SampleLayout {
        match self {
            Self::Ram(b) => b.layout(),
            _ => SampleLayout::Packed,
        }
    }

    /// Whether samples can be read on the CPU.
    pub fn is_cpu_accessible(&self) -> bool {
        !matches!(self, Self::Texture(_))
    }

    /// The texture, if this is GPU storage.
    pub fn as_texture(&self) -> Option<&GpuTexture> {
        match self {
            Self::Texture(t) => Some(t),
            _ => None,
        }
    }

    /// The disk tile, if this is disk storage.
    pub fn as_disk(&self) -> Option<&DiskTile> {
        match self {
            Self::Disk(t) => Some(t),
            _ => None,
        }
    }

    /// Shared access to the samples.
    pub fn read(&self) -> Result<SampleReadGuard<'_>> {
        match self {
            Self::Ram(b) => Ok(SampleReadGuard::Ram(b.read())),
            Self::Disk(b) => b.read().map(SampleReadGuard::Disk),
            Self::Texture(_) => Err(Error::NotCpuAccessible),
        }
    }

    /// Exclusive access to the samples.
    pub fn write(&self) -> Result<SampleWriteGuard<'_>> {
        match self {
            Self::Ram(b) => Ok(SampleWriteGuard::Ram(b.write())),
            Self::Disk(b) => b.write().map(SampleWriteGuard::Disk),
            Self::Texture(_) => Err(Error::NotCpuAccessible),
        }
    }
}

impl PixelStorage for StorageBuffer {
    fn mode(&self) -> StorageMode {
        self.storage().mode()
    }

    fn bounds(&self) -> RectI {
        self.storage().bounds()
    }

    fn bit_depth(&self) -> BitDepth {
        self.storage().bit_depth()
    }

    fn num_components(&self) -> usize {
        self.storage().num_components()
    }

    fn size_bytes(&self) -> u64 {
        self.storage().size_bytes()
    }
}

impl From<RamBuffer> for StorageBuffer {
    fn from(b: RamBuffer) -> Self {
        Self::Ram(b)
    }
}

impl From<GpuTexture> for StorageBuffer {
    fn from(t: GpuTexture) -> Self {
        Self::Texture(t)
    }
}
