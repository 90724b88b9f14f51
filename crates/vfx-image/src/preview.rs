//! Thumbnail rendering for viewers and node previews.

use vfx_core::{Result, Sample};

use crate::access::Region;
use crate::image::Image;
use crate::parallel;

/// sRGB encoding of a linear value.
#[inline]
fn oetf(l: f32) -> f32 {
    if l <= 0.0031308 {
        l * 12.92
    } else {
        1.055 * l.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn encode(l: f32) -> u32 {
    u8::from_f32(oetf(l)) as u32
}

/// Output RGB of one pixel.
fn shade(region: &Region, x: i32, y: i32, channels: [bool; 4]) -> [f32; 3] {
    let components = region.components();
    let only_alpha = channels == [false, false, false, true];
    if components == 1 || (components == 4 && only_alpha) {
        let gray = if channels.iter().any(|c| *c) {
            region.get(x, y, components - 1)
        } else {
            0.0
        };
        return [gray; 3];
    }
    let mut rgb = [0.0f32; 3];
    for (c, v) in rgb.iter_mut().enumerate() {
        if channels[c] {
            *v = region.get(x, y, c);
        }
    }
    rgb
}

/// Renders `image` into a `width` x `height` ARGB8 buffer, row-major, top
/// row first.
///
/// Sampling is nearest-neighbour over the whole image bounds. Color goes
/// through the sRGB curve with plain rounding; alpha is opaque. Channels
/// switched off in `channels` render black. Single-channel images, and
/// four-channel images with only alpha selected, render as gray.
pub fn render_preview(image: &Image, width: usize, height: usize, channels: [bool; 4]) -> Result<Vec<u32>> {
    let mut out = vec![0u32; width * height];
    if out.is_empty() {
        return Ok(out);
    }
    let bounds = image.bounds();
    let region = image.read_region(bounds)?;
    let (bw, bh) = (bounds.width() as f64, bounds.height() as f64);
    let columns: Vec<i32> = (0..width)
        .map(|i| bounds.x1 + (((i as f64 + 0.5) * bw / width as f64) as i32).min(bounds.width() - 1))
        .collect();

    let mut rows: Vec<(usize, &mut [u32])> = out.chunks_mut(width).enumerate().collect();
    parallel::for_each_mut(&mut rows, None, |(j, row)| {
        // Top row of the preview shows the top of the image.
        let from_top = (((*j as f64 + 0.5) * bh / height as f64) as i32).min(bounds.height() - 1);
        let y = bounds.y2 - 1 - from_top;
        for (px, &x) in row.iter_mut().zip(&columns) {
            let [r, g, b] = shade(&region, x, y, channels);
            *px = 0xff00_0000 | (encode(r) << 16) | (encode(g) << 8) | encode(b);
        }
        Ok(())
    })?;
    Ok(out)
}
