//! Render scale: proxy downsizing composed with mipmap levels.
//!
//! A render request is evaluated at `proxy_scale * 2^-mip_level`. The two
//! factors are kept separate because the cache keys them independently.

/// Deepest mipmap level an image accepts.
pub const MAX_MIP_LEVEL: u32 = 16;

/// A pair of scale factors in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderScale {
    /// Horizontal scale
    pub x: f64,
    /// Vertical scale
    pub y: f64,
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RenderScale {
    /// Full scale.
    pub const IDENTITY: RenderScale = RenderScale { x: 1.0, y: 1.0 };

    /// Creates a scale. Both factors must lie in `(0, 1]`.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        debug_assert!(x > 0.0 && x <= 1.0 && y > 0.0 && y <= 1.0);
        Self { x, y }
    }

    /// Uniform scale.
    #[inline]
    pub fn uniform(s: f64) -> Self {
        Self::new(s, s)
    }

    /// Scale of a mipmap level: `2^-level` on both axes.
    #[inline]
    pub fn from_mip_level(level: u32) -> Self {
        let s = mip_level_scale(level);
        Self { x: s, y: s }
    }

    /// Multiplies two scales.
    #[inline]
    pub fn compose(&self, other: &RenderScale) -> RenderScale {
        RenderScale {
            x: self.x * other.x,
            y: self.y * other.y,
        }
    }

    /// Returns `true` for full scale.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.x == 1.0 && self.y == 1.0
    }

    /// Bit patterns of both factors, for hashing and keys.
    #[inline]
    pub fn to_bits(&self) -> (u64, u64) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

/// Scale factor of a mipmap level.
#[inline]
pub fn mip_level_scale(level: u32) -> f64 {
    1.0 / f64::from(1u32 << level.min(31))
}

/// Mipmap level closest to a scale factor, `0` for scales `>= 1`.
#[inline]
pub fn mip_level_from_scale(scale: f64) -> u32 {
    if scale >= 1.0 || scale <= 0.0 {
        return 0;
    }
    (-scale.log2()).round() as u32
}
