//! Host-memory pixel buffers.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vfx_core::{BitDepth, Error, PixelData, RectI, Result};

use super::{PixelStorage, SampleLayout, StorageMode};

/// Zero-initialized samples covering `bounds`, owned in host memory.
///
/// Samples are packed (`RGBARGBA...`) or planar (`RRR...GGG...`) in row
/// order starting at `(bounds.x1, bounds.y1)`.
#[derive(Debug)]
pub struct RamBuffer {
    bounds: RectI,
    components: usize,
    layout: SampleLayout,
    data: RwLock<PixelData>,
}

impl RamBuffer {
    /// Allocates a zeroed buffer.
    ///
    /// Fails with [`Error::AllocationFailed`] on empty bounds or when the
    /// host cannot provide the memory.
    pub fn allocate(
        bounds: RectI,
        depth: BitDepth,
        components: usize,
        layout: SampleLayout,
    ) -> Result<Self> {
        if bounds.is_null() {
            return Err(Error::allocation_failed(0, format!("empty bounds {bounds}")));
        }
        if !(1..=4).contains(&components) {
            return Err(Error::incompatible_storage(format!(
                "{components} components per buffer"
            )));
        }
        let len = usize::try_from(bounds.area())
            .ok()
            .and_then(|a| a.checked_mul(components))
            .ok_or_else(|| Error::allocation_failed(usize::MAX, format!("bounds {bounds} too large")))?;
        let data = PixelData::zeroed(depth, len)?;
        Ok(Self {
            bounds,
            components,
            layout: if components == 1 { SampleLayout::Packed } else { layout },
            data: RwLock::new(data),
        })
    }

    /// Sample arrangement.
    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    /// Shared access to the samples.
    pub fn read(&self) -> RwLockReadGuard<'_, PixelData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the samples.
    pub fn write(&self) -> RwLockWriteGuard<'_, PixelData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PixelStorage for RamBuffer {
    fn mode(&self) -> StorageMode {
        StorageMode::Ram
    }

    fn bounds(&self) -> RectI {
        self.bounds
    }

    fn bit_depth(&self) -> BitDepth {
        self.read().depth()
    }

    fn num_components(&self) -> usize {
        self.components
    }

    fn size_bytes(&self) -> u64 {
        self.read().byte_len() as u64
    }
}
