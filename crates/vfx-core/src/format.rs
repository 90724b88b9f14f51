//! Sample bit depths.
//!
//! The engine stores pixels in four sample types. Integer depths hold
//! normalized values (`0..=max` maps to `0.0..=1.0`); float depths hold
//! scene values unchanged.
//!
//! # Usage
//!
//! ```rust
//! use vfx_core::BitDepth;
//!
//! assert_eq!(BitDepth::Short.bytes_per_sample(), 2);
//! assert!(!BitDepth::Byte.is_lossy_conversion_to(BitDepth::Float));
//! assert!(BitDepth::Float.is_lossy_conversion_to(BitDepth::Byte));
//! ```

/// Bit depth of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitDepth {
    /// 8-bit unsigned integer.
    Byte,
    /// 16-bit unsigned integer.
    Short,
    /// 16-bit half-precision float.
    Half,
    /// 32-bit single-precision float.
    #[default]
    Float,
}

impl BitDepth {
    /// All supported depths, smallest first.
    pub const ALL: [BitDepth; 4] = [Self::Byte, Self::Short, Self::Half, Self::Float];

    /// Bytes used by one sample.
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Short | Self::Half => 2,
            Self::Float => 4,
        }
    }

    /// Whether this is a floating-point depth.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Half | Self::Float)
    }

    /// Maximum representable integer, `1.0` for float depths.
    #[inline]
    pub const fn max_value(&self) -> f32 {
        match self {
            Self::Byte => 255.0,
            Self::Short => 65535.0,
            Self::Half | Self::Float => 1.0,
        }
    }

    /// Stable numeric tag used in cache keys and on-disk records.
    #[inline]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Short => 2,
            Self::Half => 3,
            Self::Float => 4,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    #[inline]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Byte),
            2 => Some(Self::Short),
            3 => Some(Self::Half),
            4 => Some(Self::Float),
            _ => None,
        }
    }

    /// Returns `true` when converting into `target` may lose information.
    ///
    /// Any conversion to a smaller sample, and float to integer, is lossy.
    pub const fn is_lossy_conversion_to(&self, target: BitDepth) -> bool {
        match (self, target) {
            (Self::Byte, _) => false,
            (Self::Short, Self::Byte) => true,
            (Self::Short, _) => false,
            (Self::Half, Self::Half | Self::Float) => false,
            (Self::Half, _) => true,
            (Self::Float, Self::Float) => false,
            (Self::Float, _) => true,
        }
    }

    /// Short name for display.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Half => "half",
            Self::Float => "float",
        }
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(BitDepth::Byte.bytes_per_sample(), 1);
        assert_eq!(BitDepth::Short.bytes_per_sample(), 2);
        assert_eq!(BitDepth::Half.bytes_per_sample(), 2);
        assert_eq!(BitDepth::Float.bytes_per_sample(), 4);
    }

    #[test]
    fn test_tags_round_trip() {
        for depth in BitDepth::ALL {
            assert_eq!(BitDepth::from_tag(depth.tag()), Some(depth));
        }
        assert_eq!(BitDepth::from_tag(0), None);
    }

    #[test]
    fn test_lossy_conversions() {
        assert!(!BitDepth::Byte.is_lossy_conversion_to(BitDepth::Float));
        assert!(!BitDepth::Short.is_lossy_conversion_to(BitDepth::Float));
        assert!(BitDepth::Short.is_lossy_conversion_to(BitDepth::Byte));
        assert!(BitDepth::Float.is_lossy_conversion_to(BitDepth::Half));
        assert!(BitDepth::Half.is_lossy_conversion_to(BitDepth::Short));
        assert!(!BitDepth::Half.is_lossy_conversion_to(BitDepth::Float));
    }
}
