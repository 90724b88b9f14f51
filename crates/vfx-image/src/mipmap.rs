//! Mipmap generation by repeated 2x2 box filtering.

use tracing::trace;
use vfx_core::{BitDepth, Error, MAX_MIP_LEVEL, RectI, Result, dispatch_depth};

use crate::args::{BufferFormat, InitStorageArgs};
use crate::image::Image;
use crate::kernels::halve::halve;
use crate::parallel;

impl Image {
    /// Downscales `roi` by `2^levels`.
    ///
    /// The result covers `roi.downscale_pow2(levels)` and lives in host
    /// memory without cache interaction. Zero levels and texture images
    /// return a view of this image.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedBitDepth`] for half-float images
    /// - [`Error::IncompatibleStorage`] for more than [`MAX_MIP_LEVEL`] levels
    pub fn downscale_mip_map(&self, roi: RectI, levels: u32) -> Result<Image> {
        if levels == 0 || self.is_texture() {
            return Ok(self.share());
        }
        if levels > MAX_MIP_LEVEL {
            return Err(Error::incompatible_storage(format!("{levels} mip levels beyond {MAX_MIP_LEVEL}")));
        }
        if self.bit_depth() == BitDepth::Half {
            return Err(Error::unsupported_depth(BitDepth::Half, "mipmap downscale"));
        }
        let roi = roi
            .intersect(&self.bounds())
            .ok_or_else(|| Error::allocation_failed(0, format!("downscale region {roi} outside {}", self.bounds())))?;

        let staged = if self.buffer_format().is_tiled() || roi != self.bounds() {
            Some(self.staged(roi)?)
        } else {
            None
        };
        let mut current: Option<Image> = None;
        for _ in 0..levels {
            let source = current.as_ref().or(staged.as_ref()).unwrap_or(self);
            let next = source.halve()?;
            current = Some(next);
        }
        trace!(levels, from = %roi, to = %roi.downscale_pow2(levels), "mipmap built");
        Ok(current.unwrap_or_else(|| self.share()))
    }

    /// Full-rect host copy of `roi`.
    fn staged(&self, roi: RectI) -> Result<Image> {
        let format = match self.buffer_format() {
            BufferFormat::MonoChannelTiled => BufferFormat::PackedFullRect,
            other => other,
        };
        let mut staged = Image::create(
            InitStorageArgs::new(roi, self.plane().clone())
                .with_bit_depth(self.bit_depth())
                .with_buffer_format(format)
                .with_mip_level(self.mip_level()),
        )?;
        staged.copy_pixels(self, roi)?;
        Ok(staged)
    }

    /// One 2x2 box step of a full-rect host image.
    fn halve(&self) -> Result<Image> {
        let src_bounds = self.bounds();
        let dst_bounds = src_bounds.downscale_pow2(1);
        let components = self.components_count();
        let mut args = InitStorageArgs::new(dst_bounds, self.plane().clone())
            .with_bit_depth(self.bit_depth())
            .with_buffer_format(self.buffer_format())
            .with_mip_level(self.mip_level() + 1);
        if let Some(abort) = &self.abort {
            args = args.with_abort(abort.clone());
        }
        let dst = Image::create(args)?;

        let src_tile = self.tiles.first().ok_or(Error::NotAllocated)?;
        let dst_tile = dst.tiles.first().ok_or(Error::NotAllocated)?;
        let read = src_tile.lock_read(components)?;
        let mut write = dst_tile.lock_write(components)?;
        let bands = parallel::row_bands(dst_bounds);
        dispatch_depth!(read.depth(), T => {
            let from = read.pixels::<T>().ok_or_else(|| Error::other("source depth mismatch"))?;
            let to = write.pixels_mut::<T>().ok_or_else(|| Error::other("target depth mismatch"))?;
            let mut work: Vec<_> = to.split_rows(&bands).into_iter().zip(bands.iter().copied()).collect();
            parallel::for_each_mut(&mut work, self.abort.as_ref(), |(px, band)| {
                halve(&from, src_bounds, px, *band, components);
                Ok(())
            })?;
        });
        drop(write);
        drop(read);
        Ok(dst)
    }
}
