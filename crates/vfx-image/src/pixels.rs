//! Fill, NaN repair and single-pixel reads.

use tracing::warn;
use vfx_core::{RectI, Result};

use crate::image::Image;
use crate::kernels::convert::{ChannelSource, source_channel};
use crate::kernels::fill::FillKernel;
use crate::kernels::sanitize::NanKernel;

impl Image {
    /// Sets every pixel of `roi` to `color`, given as RGBA.
    ///
    /// Channels are mapped like [`copy_pixels`](Self::copy_pixels): a
    /// single-channel image takes the alpha value.
    pub fn fill(&mut self, color: [f32; 4], roi: RectI) -> Result<()> {
        let components = self.components_count();
        let mut values = [0.0f32; 4];
        for (c, v) in values.iter_mut().enumerate().take(components) {
            *v = match source_channel(components, 4, c) {
                ChannelSource::Channel(s) => color[s],
                ChannelSource::Constant(k) => k,
            };
        }
        if self.is_texture() {
            let Some(roi) = roi.intersect(&self.bounds()) else {
                return Ok(());
            };
            self.realize(roi)?;
            let texture = self.texture()?;
            return texture.context().fill(texture.id(), roi, values);
        }
        self.run_kernel(roi, &FillKernel { values, components })?;
        Ok(())
    }

    /// Sets every sample of `roi` to zero.
    pub fn fill_zero(&mut self, roi: RectI) -> Result<()> {
        self.fill([0.0; 4], roi)
    }

    /// Replaces NaN samples of `roi` with 1.0.
    ///
    /// Returns whether anything was replaced. Integer images never hold
    /// NaNs and return `false` without touching the pixels.
    pub fn check_for_nans(&mut self, roi: RectI) -> Result<bool> {
        if !self.bit_depth().is_float() {
            return Ok(false);
        }
        let replaced = self.run_kernel(
            roi,
            &NanKernel {
                components: self.components_count(),
            },
        )?;
        if replaced {
            warn!(roi = %roi, bounds = %self.bounds(), "NaN samples replaced with 1.0");
        }
        Ok(replaced)
    }

    /// Normalized samples at `(x, y)`; channels past the image's count are 0.
    ///
    /// `None` outside the bounds or when the storage cannot be read.
    pub fn pixel(&self, x: i32, y: i32) -> Option<[f32; 4]> {
        if !self.bounds().contains_point(x, y) {
            return None;
        }
        let region = self.read_region(RectI::new(x, y, x + 1, y + 1)).ok()?;
        let mut out = [0.0f32; 4];
        for (c, v) in out.iter_mut().enumerate().take(region.components()) {
            *v = region.get(x, y, c);
        }
        Some(out)
    }
}
