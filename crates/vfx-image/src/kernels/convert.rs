//! Sample conversion between tiles and normalized regions.

use vfx_core::{RectI, Result, Sample};

use super::TileKernel;
use crate::access::{Pixels, PixelsMut, Region};
use crate::image::Image;

/// Where a destination channel takes its value from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelSource {
    /// Source channel index.
    Channel(usize),
    /// Fixed value.
    Constant(f32),
}

/// Maps channel `c` of a `dst`-component image onto a `src`-component one.
///
/// A single component is alpha. Missing color reads as 0, missing alpha as 1.
pub fn source_channel(dst: usize, src: usize, c: usize) -> ChannelSource {
    if dst == src {
        return ChannelSource::Channel(c);
    }
    let src_alpha = match src {
        1 => Some(0),
        4 => Some(3),
        _ => None,
    };
    let is_alpha = dst == 1 || (dst == 4 && c == 3);
    if is_alpha {
        src_alpha.map_or(ChannelSource::Constant(1.0), ChannelSource::Channel)
    } else if src == 1 || c >= src {
        ChannelSource::Constant(0.0)
    } else {
        ChannelSource::Channel(c)
    }
}

/// Value of destination channel `c` at `(x, y)` read from `region`.
#[inline]
pub(crate) fn mapped(region: &Region, dst_components: usize, x: i32, y: i32, c: usize) -> f32 {
    match source_channel(dst_components, region.components(), c) {
        ChannelSource::Channel(s) => region.get(x, y, s),
        ChannelSource::Constant(k) => k,
    }
}

/// Normalizes the samples of `rect` into `region`.
pub(crate) fn read_into<T: Sample>(src: &Pixels<'_, T>, region: &mut Region, rect: RectI) {
    let components = region.components();
    for y in rect.y1..rect.y2 {
        for x in rect.x1..rect.x2 {
            for c in 0..components {
                region.set(x, y, c, src.get_f32(x, y, c));
            }
        }
    }
}

/// Pixels of a copy source.
pub(crate) enum Source<'a> {
    Image(&'a Image),
    Snapshot(Region),
}

impl Source<'_> {
    pub(crate) fn read(&self, rect: RectI) -> Result<Region> {
        match self {
            Self::Image(image) => image.read_region(rect),
            Self::Snapshot(region) => Ok(region.crop(rect)),
        }
    }
}

/// Quantizing copy from a source image.
pub(crate) struct CopyKernel<'a> {
    pub source: Source<'a>,
    pub components: usize,
    pub bands: Option<Vec<RectI>>,
}

impl TileKernel for CopyKernel<'_> {
    type Input = Region;

    fn prepare(&self, rect: RectI) -> Result<Region> {
        self.source.read(rect)
    }

    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, input: Region) -> bool {
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                for c in 0..self.components {
                    dst.set_f32(x, y, c, mapped(&input, self.components, x, y, c));
                }
            }
        }
        true
    }

    fn bands(&self, roi: RectI) -> Option<Vec<RectI>> {
        let bands = self.bands.as_ref()?;
        Some(bands.iter().filter_map(|b| b.intersect(&roi)).collect())
    }
}
