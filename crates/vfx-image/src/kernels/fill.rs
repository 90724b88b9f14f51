//! Constant fill.

use vfx_core::{RectI, Result, Sample};

use super::TileKernel;
use crate::access::PixelsMut;

/// Sets every channel to a constant.
pub(crate) struct FillKernel {
    /// Value per destination channel.
    pub values: [f32; 4],
    pub components: usize,
}

impl TileKernel for FillKernel {
    type Input = ();

    fn prepare(&self, _rect: RectI) -> Result<()> {
        Ok(())
    }

    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, _input: ()) -> bool {
        let mut quantized = [T::ZERO; 4];
        for (q, v) in quantized.iter_mut().zip(self.values) {
            *q = T::from_f32(v);
        }
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                for (c, v) in quantized.iter().enumerate().take(self.components) {
                    dst.set(x, y, c, *v);
                }
            }
        }
        true
    }
}
