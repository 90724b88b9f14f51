//! 2x2 box downscale.

use vfx_core::{RectI, Sample};

use crate::access::{Pixels, PixelsMut};

/// Averages 2x2 blocks of `src` into `rect` of `dst`.
///
/// Samples outside `src_bounds` are left out of both the sum and the
/// divisor, so edge pixels average over 1, 2 or 4 samples. Sums run in raw
/// storage units and pairwise, which keeps constant images exact.
pub(crate) fn halve<T: Sample>(
    src: &Pixels<'_, T>,
    src_bounds: RectI,
    dst: &mut PixelsMut<'_, T>,
    rect: RectI,
    components: usize,
) {
    for y in rect.y1..rect.y2 {
        for x in rect.x1..rect.x2 {
            let taps = [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)];
            for c in 0..components {
                let mut v = [0.0f32; 4];
                let mut count = 0u32;
                for (slot, (sx, sy)) in v.iter_mut().zip(taps) {
                    if !src_bounds.contains_point(sx, sy) {
                        continue;
                    }
                    if let Some(s) = src.get(sx, sy, c) {
                        *slot = s.to_raw();
                        count += 1;
                    }
                }
                if count > 0 {
                    let sum = (v[0] + v[1]) + (v[2] + v[3]);
                    dst.set(x, y, c, T::from_raw(sum / count as f32));
                }
            }
        }
    }
}
