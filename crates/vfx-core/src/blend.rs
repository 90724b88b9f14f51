//! Mask/mix blending arithmetic shared by CPU and texture backends.

/// Blend weight of the processed value at one pixel.
///
/// `mask_alpha` is the mask's alpha at the pixel, `None` when no mask
/// image is connected (the effect then applies fully). Inversion flips the
/// alpha before `mix` scales it.
#[inline]
pub fn mask_mix_factor(mask_alpha: Option<f32>, mix: f32, invert: bool) -> f32 {
    let m = match mask_alpha {
        Some(a) if invert => 1.0 - a,
        Some(a) => a,
        None => 1.0,
    };
    mix * m
}

/// `processed * factor + original * (1 - factor)`.
#[inline]
pub fn mix_sample(processed: f32, original: f32, factor: f32) -> f32 {
    processed * factor + original * (1.0 - factor)
}
