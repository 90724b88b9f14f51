//! NaN replacement.

use vfx_core::{RectI, Result, Sample};

use super::TileKernel;
use crate::access::PixelsMut;

/// Replaces NaN samples with 1.0. Infinities are kept.
pub(crate) struct NanKernel {
    pub components: usize,
}

impl TileKernel for NanKernel {
    type Input = ();

    fn prepare(&self, _rect: RectI) -> Result<()> {
        Ok(())
    }

    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, _input: ()) -> bool {
        let mut replaced = false;
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                for c in 0..self.components {
                    if dst.get(x, y, c).is_some_and(T::is_nan) {
                        dst.set(x, y, c, T::ONE);
                        replaced = true;
                    }
                }
            }
        }
        replaced
    }
}
