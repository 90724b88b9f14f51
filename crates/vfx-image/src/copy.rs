//! Copies between images of any layout, depth and storage.

use std::sync::Arc;

use tracing::trace;
use vfx_cache::{PixelStorage, StorageBuffer};
use vfx_core::{RectI, Result};

use crate::access::Region;
use crate::image::Image;
use crate::kernels::convert::{self, CopyKernel, Source};

impl Image {
    /// Copies `roi` of `src` into this image.
    ///
    /// The region is clipped to both images. Samples are converted to this
    /// image's depth and channels are mapped by meaning: a single channel is
    /// alpha, missing alpha reads as 1 and missing color as 0.
    ///
    /// When both images cover the same area with the same storage kind,
    /// sample type, layout and tile grid, buffers are shared instead of
    /// copied. Textures are always copied.
    pub fn copy_pixels(&mut self, src: &Image, roi: RectI) -> Result<()> {
        let Some(roi) = roi.intersect(&self.bounds()).and_then(|r| r.intersect(&src.bounds())) else {
            return Ok(());
        };
        if let Some(buffers) = self.shareable_buffers(src, roi) {
            self.adopt_buffers(buffers);
            return Ok(());
        }

        let components = self.components_count();
        if self.is_texture() {
            self.realize(roi)?;
            let region = src.read_region(roi)?;
            let mut mapped = Region::new(roi, components);
            for y in roi.y1..roi.y2 {
                for x in roi.x1..roi.x2 {
                    for c in 0..components {
                        mapped.set(x, y, c, convert::mapped(&region, components, x, y, c));
                    }
                }
            }
            let texture = self.texture()?;
            return texture.context().upload(texture.id(), roi, &mapped.to_texels());
        }

        let source = if self.shares_storage_with(src) {
            Source::Snapshot(src.read_region(roi)?)
        } else {
            Source::Image(src)
        };
        let bands = src.buffer_format().is_tiled().then(|| tile_rows(src, roi));
        self.run_kernel(
            roi,
            &CopyKernel {
                source,
                components,
                bands,
            },
        )?;
        Ok(())
    }

    /// Buffers of `src` this image can share for a copy of `roi`, one per
    /// buffer of this image in tile order.
    ///
    /// Sharing needs the full bounds, the same layout, depth, storage and
    /// channels, and the same tile grid. Textures are never shared.
    fn shareable_buffers(&self, src: &Image, roi: RectI) -> Option<Vec<Arc<StorageBuffer>>> {
        if src.buffer_format() != self.buffer_format()
            || roi != self.bounds()
            || src.bounds() != self.bounds()
            || src.bit_depth() != self.bit_depth()
            || src.storage_mode() != self.storage_mode()
            || src.components_count() != self.components_count()
            || src.tiles.len() != self.tiles.len()
            || self.is_texture()
            || src.is_texture()
        {
            return None;
        }
        let mut shared = Vec::new();
        for (ours, theirs) in self.tiles.iter().zip(&src.tiles) {
            if ours.bounds() != theirs.bounds() || ours.channels.len() != theirs.channels.len() {
                return None;
            }
            for (mine, other) in ours.channels.iter().zip(&theirs.channels) {
                let buffer = other.buffer()?;
                if mine.channel != other.channel
                    || buffer.as_texture().is_some()
                    || !buffer.bounds().contains(&ours.bounds())
                {
                    return None;
                }
                shared.push(buffer.clone());
            }
        }
        Some(shared)
    }

    fn adopt_buffers(&mut self, buffers: Vec<Arc<StorageBuffer>>) {
        let monos = self.tiles.iter_mut().flat_map(|t| t.channels.iter_mut());
        let mut released = Vec::new();
        for (mono, buffer) in monos.zip(buffers) {
            if mono.buffer().is_some_and(|b| Arc::ptr_eq(b, &buffer)) {
                continue;
            }
            released.extend(mono.replace_buffer(buffer));
        }
        trace!(bounds = %self.bounds(), tiles = self.tiles.len(), "copy shares the source buffers");
        if let Some(cache) = &self.cache {
            cache.release_later(released);
        }
    }
}

/// Row bands following the tile rows of `src`, clipped to `roi`.
fn tile_rows(src: &Image, roi: RectI) -> Vec<RectI> {
    let mut rows: Vec<(i32, i32)> = src
        .tiles()
        .iter()
        .filter_map(|t| t.bounds().intersect(&roi))
        .map(|r| (r.y1, r.y2))
        .collect();
    rows.sort_unstable();
    rows.dedup();
    rows.into_iter().map(|(y1, y2)| RectI::new(roi.x1, y1, roi.x2, y2)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{BufferFormat, InitStorageArgs};
    use vfx_core::{BitDepth, ImagePlaneDesc};

    #[test]
    fn test_tile_rows_follow_grid() {
        let bounds = RectI::new(0, 0, 300, 300);
        let src = Image::create(
            InitStorageArgs::new(bounds, ImagePlaneDesc::alpha())
                .with_bit_depth(BitDepth::Float)
                .with_buffer_format(BufferFormat::MonoChannelTiled),
        )
        .unwrap();
        let rows = tile_rows(&src, RectI::new(10, 100, 20, 290));
        assert_eq!(rows, vec![RectI::new(10, 100, 20, 128), RectI::new(10, 128, 20, 256), RectI::new(10, 256, 20, 290)]);
    }

    #[test]
    fn test_full_copy_shares_buffer() {
        let bounds = RectI::from_size(8, 8);
        let src = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
        let mut dst = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
        dst.copy_pixels(&src, bounds).unwrap();
        assert!(dst.shares_storage_with(&src));
    }

    #[test]
    fn test_full_copy_shares_tile_buffers() {
        let bounds = RectI::new(0, 0, 300, 200);
        let args = || {
            InitStorageArgs::new(bounds, ImagePlaneDesc::rgb())
                .with_bit_depth(BitDepth::Byte)
                .with_buffer_format(BufferFormat::MonoChannelTiled)
        };
        let mut src = Image::create(args()).unwrap();
        src.fill([0.0, 1.0, 0.0, 1.0], bounds).unwrap();
        let mut dst = Image::create(args()).unwrap();
        dst.copy_pixels(&src, bounds).unwrap();
        assert_eq!(dst.tiles().len(), 2);
        for (ours, theirs) in dst.tiles().iter().zip(src.tiles()) {
            for (a, b) in ours.channels().iter().zip(theirs.channels()) {
                assert!(Arc::ptr_eq(a.buffer().unwrap(), b.buffer().unwrap()));
            }
        }
        assert_eq!(dst.pixel(299, 199), Some([0.0, 1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_different_grids_are_copied() {
        let src = Image::create(
            InitStorageArgs::new(RectI::new(0, 0, 300, 200), ImagePlaneDesc::alpha())
                .with_bit_depth(BitDepth::Byte)
                .with_buffer_format(BufferFormat::MonoChannelTiled),
        )
        .unwrap();
        let mut dst = Image::create(
            InitStorageArgs::new(RectI::new(0, 0, 300, 200), ImagePlaneDesc::alpha())
                .with_bit_depth(BitDepth::Float)
                .with_buffer_format(BufferFormat::MonoChannelTiled),
        )
        .unwrap();
        dst.copy_pixels(&src, dst.bounds()).unwrap();
        assert!(!dst.shares_storage_with(&src));
    }

    #[test]
    fn test_partial_copy_converts() {
        let bounds = RectI::from_size(4, 4);
        let mut src = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
        src.fill([1.0, 0.5, 0.25, 1.0], bounds).unwrap();
        let mut dst = Image::create(
            InitStorageArgs::new(bounds, ImagePlaneDesc::rgba()).with_bit_depth(BitDepth::Byte),
        )
        .unwrap();
        dst.copy_pixels(&src, RectI::new(0, 0, 2, 2)).unwrap();
        assert!(!dst.shares_storage_with(&src));
        assert_eq!(dst.pixel(1, 1), Some([1.0, 128.0 / 255.0, 64.0 / 255.0, 1.0]));
        assert_eq!(dst.pixel(3, 3), Some([0.0; 4]));
    }
}
