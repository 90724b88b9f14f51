//! Mask/mix blending and restoration of unprocessed channels.

use vfx_core::blend::{mask_mix_factor, mix_sample};
use vfx_core::{RectI, Result, Sample};

use super::TileKernel;
use super::convert::mapped;
use crate::access::{PixelsMut, Region};
use crate::image::Image;

fn read(image: Option<&Image>, rect: RectI) -> Result<Option<Region>> {
    image.map(|i| i.read_region(rect)).transpose()
}

/// Alpha channel of a mask region, if it has one.
fn alpha_channel(components: usize) -> Option<usize> {
    match components {
        1 => Some(0),
        4 => Some(3),
        _ => None,
    }
}

/// `dst = dst * f + original * (1 - f)` with `f = mix * mask`.
pub(crate) struct MaskMixKernel<'a> {
    pub original: Option<&'a Image>,
    pub mask: Option<&'a Image>,
    pub mix: f32,
    pub invert: bool,
    pub components: usize,
}

impl TileKernel for MaskMixKernel<'_> {
    type Input = (Option<Region>, Option<Region>);

    fn prepare(&self, rect: RectI) -> Result<Self::Input> {
        Ok((read(self.original, rect)?, read(self.mask, rect)?))
    }

    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, input: Self::Input) -> bool {
        let (original, mask) = input;
        let alpha = mask.as_ref().and_then(|m| Some((m, alpha_channel(m.components())?)));
        let mut changed = false;
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let factor = mask_mix_factor(alpha.map(|(m, a)| m.get(x, y, a)), self.mix, self.invert);
                if factor == 1.0 {
                    continue;
                }
                for c in 0..self.components {
                    let Some(processed) = dst.get(x, y, c) else {
                        continue;
                    };
                    let orig = original.as_ref().map_or(0.0, |o| mapped(o, self.components, x, y, c));
                    dst.set_f32(x, y, c, mix_sample(processed.to_f32(), orig, factor));
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Channel of the 4-bit processed mask matching channel `c`.
#[inline]
pub(crate) fn semantic_channel(components: usize, c: usize) -> usize {
    if components == 1 { 3 } else { c }
}

/// Copies channels not marked as processed from the original image.
pub(crate) struct UnprocessedKernel<'a> {
    pub original: Option<&'a Image>,
    pub processed: [bool; 4],
    pub components: usize,
}

impl TileKernel for UnprocessedKernel<'_> {
    type Input = Option<Region>;

    fn prepare(&self, rect: RectI) -> Result<Option<Region>> {
        read(self.original, rect)
    }

    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, original: Option<Region>) -> bool {
        let restore: Vec<usize> = (0..self.components)
            .filter(|c| !self.processed[semantic_channel(self.components, *c)])
            .collect();
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                for &c in &restore {
                    let v = original.as_ref().map_or(0.0, |o| mapped(o, self.components, x, y, c));
                    dst.set_f32(x, y, c, v);
                }
            }
        }
        !restore.is_empty()
    }
}
