//! Sample types and typed views over raw pixel storage.
//!
//! Storage backends keep their pixels as one of four sample types. The
//! [`Sample`] trait gives kernels a uniform way to read, write and convert
//! them, and [`SamplesRef`] / [`SamplesMut`] carry a borrowed buffer whose
//! element type is only known at runtime.
//!
//! # Conversion contract
//!
//! - Integer samples are normalized: `u8` 255 and `u16` 65535 map to `1.0`.
//! - Narrowing a value into an integer sample scales by the maximum
//!   representable integer and rounds to nearest; it never truncates.
//! - Widening (for example `u8` to `u16`) goes through the normalized value
//!   and is exact: `v8 * 257 == v16`.
//!
//! # Runtime dispatch
//!
//! [`dispatch_depth!`](crate::dispatch_depth) binds a type alias to the
//! sample type of a [`BitDepth`] so generic kernels can be monomorphized
//! from a runtime depth:
//!
//! ```rust
//! use vfx_core::{dispatch_depth, BitDepth, Sample};
//!
//! fn bytes(depth: BitDepth) -> usize {
//!     dispatch_depth!(depth, T => std::mem::size_of::<T>())
//! }
//! assert_eq!(bytes(BitDepth::Half), 2);
//! ```

use half::f16;

use crate::error::{Error, Result};
use crate::format::BitDepth;

/// A pixel sample type (`u8`, `u16`, `f16`, `f32`).
pub trait Sample: Copy + Default + Send + Sync + PartialEq + bytemuck::Pod + 'static {
    /// Bit depth tag of this sample type.
    const DEPTH: BitDepth;

    /// Zero sample.
    const ZERO: Self;

    /// Sample representing `1.0`.
    const ONE: Self;

    /// Normalized value (`[0, 1]` for integers).
    fn to_f32(self) -> f32;

    /// Quantizes a normalized value, clamping and rounding for integers.
    fn from_f32(v: f32) -> Self;

    /// Value in storage units, without normalization.
    fn to_raw(self) -> f32;

    /// Inverse of [`to_raw`](Self::to_raw), rounding for integers.
    fn from_raw(v: f32) -> Self;

    /// Whether the sample is a NaN. Always `false` for integers.
    #[inline]
    fn is_nan(self) -> bool {
        false
    }

    /// Typed view of a runtime buffer, `None` on a depth mismatch.
    fn slice(samples: SamplesRef<'_>) -> Option<&'_ [Self]>;

    /// Typed mutable view of a runtime buffer, `None` on a depth mismatch.
    fn slice_mut(samples: SamplesMut<'_>) -> Option<&'_ mut [Self]>;
}

#[inline]
fn quantize(v: f32, max: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    (v.clamp(0.0, 1.0) * max).round()
}

impl Sample for u8 {
    const DEPTH: BitDepth = BitDepth::Byte;
    const ZERO: Self = 0;
    const ONE: Self = u8::MAX;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        quantize(v, 255.0) as u8
    }

    #[inline]
    fn to_raw(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_raw(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }

    fn slice(samples: SamplesRef<'_>) -> Option<&'_ [Self]> {
        match samples {
            SamplesRef::U8(s) => Some(s),
            _ => None,
        }
    }

    fn slice_mut(samples: SamplesMut<'_>) -> Option<&'_ mut [Self]> {
        match samples {
            SamplesMut::U8(s) => Some(s),
            _ => None,
        }
    }
}

impl Sample for u16 {
    const DEPTH: BitDepth = BitDepth::Short;
    const ZERO: Self = 0;
    const ONE: Self = u16::MAX;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 65535.0
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        quantize(v, 65535.0) as u16
    }

    #[inline]
    fn to_raw(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_raw(v: f32) -> Self {
        v.round().clamp(0.0, 65535.0) as u16
    }

    fn slice(samples: SamplesRef<'_>) -> Option<&'_ [Self]> {
        match samples {
            SamplesRef::U16(s) => Some(s),
            _ => None,
        }
    }

    fn slice_mut(samples: SamplesMut<'_>) -> Option<&'_ mut [Self]> {
        match samples {
            SamplesMut::U16(s) => Some(s),
            _ => None,
        }
    }
}

impl Sample for f16 {
    const DEPTH: BitDepth = BitDepth::Half;
    const ZERO: Self = f16::ZERO;
    const ONE: Self = f16::ONE;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    #[inline]
    fn to_raw(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_raw(v: f32) -> Self {
        f16::from_f32(v)
    }

    #[inline]
    fn is_nan(self) -> bool {
        f16::is_nan(self)
    }

    fn slice(samples: SamplesRef<'_>) -> Option<&'_ [Self]> {
        match samples {
            SamplesRef::F16(s) => Some(s),
            _ => None,
        }
    }

    fn slice_mut(samples: SamplesMut<'_>) -> Option<&'_ mut [Self]> {
        match samples {
            SamplesMut::F16(s) => Some(s),
            _ => None,
        }
    }
}

impl Sample for f32 {
    const DEPTH: BitDepth = BitDepth::Float;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn to_raw(self) -> f32 {
        self
    }

    #[inline]
    fn from_raw(v: f32) -> Self {
        v
    }

    #[inline]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }

    fn slice(samples: SamplesRef<'_>) -> Option<&'_ [Self]> {
        match samples {
            SamplesRef::F32(s) => Some(s),
            _ => None,
        }
    }

    fn slice_mut(samples: SamplesMut<'_>) -> Option<&'_ mut [Self]> {
        match samples {
            SamplesMut::F32(s) => Some(s),
            _ => None,
        }
    }
}

/// Borrowed samples of a runtime bit depth.
#[derive(Debug, Clone, Copy)]
pub enum SamplesRef<'a> {
    /// 8-bit samples
    U8(&'a [u8]),
    /// 16-bit samples
    U16(&'a [u16]),
    /// Half-float samples
    F16(&'a [f16]),
    /// Float samples
    F32(&'a [f32]),
}

/// Mutably borrowed samples of a runtime bit depth.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    /// 8-bit samples
    U8(&'a mut [u8]),
    /// 16-bit samples
    U16(&'a mut [u16]),
    /// Half-float samples
    F16(&'a mut [f16]),
    /// Float samples
    F32(&'a mut [f32]),
}

impl<'a> SamplesRef<'a> {
    /// Depth of the borrowed samples.
    pub fn depth(&self) -> BitDepth {
        match self {
            Self::U8(_) => BitDepth::Byte,
            Self::U16(_) => BitDepth::Short,
            Self::F16(_) => BitDepth::Half,
            Self::F32(_) => BitDepth::Float,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(s) => s.len(),
            Self::U16(s) => s.len(),
            Self::F16(s) => s.len(),
            Self::F32(s) => s.len(),
        }
    }

    /// Returns `true` when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterprets raw bytes as samples of `depth`.
    ///
    /// Fails if the slice is misaligned or its length is not a multiple of
    /// the sample size.
    pub fn from_bytes(depth: BitDepth, bytes: &'a [u8]) -> Result<Self> {
        let cast = |e: bytemuck::PodCastError| Error::other(format!("cannot view bytes as {depth}: {e:?}"));
        Ok(match depth {
            BitDepth::Byte => Self::U8(bytes),
            BitDepth::Short => Self::U16(bytemuck::try_cast_slice(bytes).map_err(cast)?),
            BitDepth::Half => Self::F16(bytemuck::try_cast_slice(bytes).map_err(cast)?),
            BitDepth::Float => Self::F32(bytemuck::try_cast_slice(bytes).map_err(cast)?),
        })
    }
}

impl<'a> SamplesMut<'a> {
    /// Depth of the borrowed samples.
    pub fn depth(&self) -> BitDepth {
        match self {
            Self::U8(_) => BitDepth::Byte,
            Self::U16(_) => BitDepth::Short,
            Self::F16(_) => BitDepth::Half,
            Self::F32(_) => BitDepth::Float,
        }
    }

    /// Reinterprets raw bytes as mutable samples of `depth`.
    pub fn from_bytes(depth: BitDepth, bytes: &'a mut [u8]) -> Result<Self> {
        let cast = |e: bytemuck::PodCastError| Error::other(format!("cannot view bytes as {depth}: {e:?}"));
        Ok(match depth {
            BitDepth::Byte => Self::U8(bytes),
            BitDepth::Short => Self::U16(bytemuck::try_cast_slice_mut(bytes).map_err(cast)?),
            BitDepth::Half => Self::F16(bytemuck::try_cast_slice_mut(bytes).map_err(cast)?),
            BitDepth::Float => Self::F32(bytemuck::try_cast_slice_mut(bytes).map_err(cast)?),
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// Returns `true` when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reborrows with a shorter lifetime.
    pub fn reborrow(&mut self) -> SamplesMut<'_> {
        match self {
            Self::U8(s) => SamplesMut::U8(s),
            Self::U16(s) => SamplesMut::U16(s),
            Self::F16(s) => SamplesMut::F16(s),
            Self::F32(s) => SamplesMut::F32(s),
        }
    }

    /// Reborrows as shared samples.
    pub fn as_ref(&self) -> SamplesRef<'_> {
        match self {
            Self::U8(s) => SamplesRef::U8(s),
            Self::U16(s) => SamplesRef::U16(s),
            Self::F16(s) => SamplesRef::F16(s),
            Self::F32(s) => SamplesRef::F32(s),
        }
    }
}

/// Owned, zero-initialized sample storage.
///
/// Used as the backing store of host-memory buffers.
#[derive(Debug, Clone)]
pub enum PixelData {
    /// 8-bit samples
    U8(Vec<u8>),
    /// 16-bit samples
    U16(Vec<u16>),
    /// Half-float samples
    F16(Vec<f16>),
    /// Float samples
    F32(Vec<f32>),
}

fn zeroed_vec<T: Sample>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| {
        Error::allocation_failed(len * std::mem::size_of::<T>(), e.to_string())
    })?;
    v.resize(len, T::ZERO);
    Ok(v)
}

impl PixelData {
    /// Allocates `len` zeroed samples of `depth`.
    ///
    /// Reports [`Error::AllocationFailed`] instead of aborting when the host
    /// cannot satisfy the request.
    pub fn zeroed(depth: BitDepth, len: usize) -> Result<Self> {
        Ok(match depth {
            BitDepth::Byte => Self::U8(zeroed_vec(len)?),
            BitDepth::Short => Self::U16(zeroed_vec(len)?),
            BitDepth::Half => Self::F16(zeroed_vec(len)?),
            BitDepth::Float => Self::F32(zeroed_vec(len)?),
        })
    }

    /// Sample depth.
    pub fn depth(&self) -> BitDepth {
        self.as_samples().depth()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.as_samples().len()
    }

    /// Returns `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.depth().bytes_per_sample()
    }

    /// Shared view.
    pub fn as_samples(&self) -> SamplesRef<'_> {
        match self {
            Self::U8(v) => SamplesRef::U8(v),
            Self::U16(v) => SamplesRef::U16(v),
            Self::F16(v) => SamplesRef::F16(v),
            Self::F32(v) => SamplesRef::F32(v),
        }
    }

    /// Mutable view.
    pub fn as_samples_mut(&mut self) -> SamplesMut<'_> {
        match self {
            Self::U8(v) => SamplesMut::U8(v),
            Self::U16(v) => SamplesMut::U16(v),
            Self::F16(v) => SamplesMut::F16(v),
            Self::F32(v) => SamplesMut::F32(v),
        }
    }
}

/// Binds a type alias to the sample type of a runtime [`BitDepth`].
///
/// `dispatch_depth!(depth, T => expr)` evaluates `expr` with `T` set to
/// `u8`, `u16`, `f16` or `f32`.
#[macro_export]
macro_rules! dispatch_depth {
    ($depth:expr, $T:ident => $body:expr) => {
        match $depth {
            $crate::BitDepth::Byte => {
                #[allow(dead_code)]
                type $T = u8;
                $body
            }
            $crate::BitDepth::Short => {
                #[allow(dead_code)]
                type $T = u16;
                $body
            }
            $crate::BitDepth::Half => {
                #[allow(dead_code)]
                type $T = $crate::half::f16;
                $body
            }
            $crate::BitDepth::Float => {
                #[allow(dead_code)]
                type $T = f32;
                $body
            }
        }
    };
}
