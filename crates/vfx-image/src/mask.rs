//! Mask/mix blending against the unprocessed image.

use std::sync::Arc;

use tracing::trace;
use vfx_cache::{GpuTexture, MaskMixParams, TextureContext, TextureId};
use vfx_core::{Error, RectI, Result};

use crate::access::Region;
use crate::image::Image;
use crate::kernels::convert;
use crate::kernels::mix::{MaskMixKernel, UnprocessedKernel};

/// Whether restoring unprocessed channels has any effect.
///
/// `processed` is indexed R, G, B, A; a single-channel image only looks at
/// alpha. Returns `false` when every channel the image holds is processed.
pub fn can_call_copy_unprocessed_channels(components: usize, processed: [bool; 4]) -> bool {
    let [r, g, b, a] = processed;
    match components {
        1 => !a,
        2 => !(r && g),
        3 => !(r && g && b),
        4 => !(r && g && b && a),
        _ => false,
    }
}

impl Image {
    /// Blends this image with `original` over `roi`.
    ///
    /// Each pixel becomes `processed * f + original * (1 - f)` with
    /// `f = mix * mask_alpha`, or `f = mix` when `masked` is false or no mask
    /// is given. `invert` uses `1 - mask_alpha`. Pixels outside `original`
    /// or `mask` read as zero. Nothing happens when `masked` is false and
    /// `mix` is 1.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleStorage`] when a mask is applied that has neither
    /// 1 nor 4 components.
    pub fn apply_mask_mix(
        &mut self,
        roi: RectI,
        original: Option<&Image>,
        mask: Option<&Image>,
        masked: bool,
        invert: bool,
        mix: f32,
    ) -> Result<()> {
        if !masked && mix == 1.0 {
            return Ok(());
        }
        let mask = if masked { mask } else { None };
        if let Some(m) = mask {
            let components = m.components_count();
            if components != 1 && components != 4 {
                return Err(Error::incompatible_storage(format!(
                    "mask needs an alpha channel, got {components} component(s)"
                )));
            }
        }
        if self.is_texture() {
            if let Some(roi) = roi.intersect(&self.bounds()) {
                return self.mask_mix_on_texture(roi, original, mask, invert, mix);
            }
            return Ok(());
        }
        self.run_kernel(
            roi,
            &MaskMixKernel {
                original,
                mask,
                mix,
                invert,
                components: self.components_count(),
            },
        )?;
        Ok(())
    }

    /// Whether [`copy_unprocessed_channels`](Self::copy_unprocessed_channels)
    /// would change anything.
    pub fn can_copy_unprocessed_channels(&self, processed: [bool; 4]) -> bool {
        can_call_copy_unprocessed_channels(self.components_count(), processed)
    }

    /// Restores the channels not marked in `processed` from `original`.
    ///
    /// Without an original the restored channels become zero.
    pub fn copy_unprocessed_channels(
        &mut self,
        roi: RectI,
        original: Option<&Image>,
        processed: [bool; 4],
    ) -> Result<()> {
        if !self.can_copy_unprocessed_channels(processed) {
            return Ok(());
        }
        self.run_kernel(
            roi,
            &UnprocessedKernel {
                original,
                processed,
                components: self.components_count(),
            },
        )?;
        Ok(())
    }

    /// One-pass blend on the texture's context; inputs living elsewhere are
    /// uploaded into temporary textures first.
    fn mask_mix_on_texture(
        &mut self,
        roi: RectI,
        original: Option<&Image>,
        mask: Option<&Image>,
        invert: bool,
        mix: f32,
    ) -> Result<()> {
        self.realize(roi)?;
        let components = self.components_count();
        let texture = self.texture()?;
        let context = texture.context().clone();
        let mut temporaries = Vec::new();

        let original_id = original
            .map(|image| {
                let direct = image.components_count() == components;
                texture_input(&context, image, roi, direct, &mut temporaries, |region, x, y| {
                    let mut texel = [0.0; 4];
                    for (c, v) in texel.iter_mut().enumerate().take(components) {
                        *v = convert::mapped(region, components, x, y, c);
                    }
                    texel
                })
            })
            .transpose()?;
        let mask_alpha = mask.and_then(|image| match image.components_count() {
            1 => Some((image, 0)),
            4 => Some((image, 3)),
            _ => None,
        });
        let mask_id = mask_alpha
            .map(|(image, a)| {
                texture_input(&context, image, roi, a == 3, &mut temporaries, |region, x, y| {
                    [0.0, 0.0, 0.0, region.get(x, y, a)]
                })
            })
            .transpose()?;

        context.mask_mix(
            texture.id(),
            &MaskMixParams {
                original: original_id,
                mask: mask_id,
                roi,
                mix,
                invert_mask: invert,
            },
        )?;
        trace!(%roi, uploads = temporaries.len(), "mask mix on texture");
        Ok(())
    }
}

/// Texture holding `image` on `context`.
///
/// A texture of the same context is used directly when `direct` holds;
/// otherwise `roi` is read, converted to texels by `texel` and uploaded.
fn texture_input(
    context: &Arc<dyn TextureContext>,
    image: &Image,
    roi: RectI,
    direct: bool,
    temporaries: &mut Vec<GpuTexture>,
    texel: impl Fn(&Region, i32, i32) -> [f32; 4],
) -> Result<TextureId> {
    if direct && image.is_texture() {
        let theirs = image.texture()?;
        if theirs.context().id() == context.id() {
            return Ok(theirs.id());
        }
    }
    let region = image.read_region(roi)?;
    let mut texels = Vec::with_capacity(roi.area() as usize * 4);
    for y in roi.y1..roi.y2 {
        for x in roi.x1..roi.x2 {
            texels.extend_from_slice(&texel(&region, x, y));
        }
    }
    let temporary = GpuTexture::allocate(context.clone(), roi)?;
    context.upload(temporary.id(), roi, &texels)?;
    let id = temporary.id();
    temporaries.push(temporary);
    Ok(id)
}
