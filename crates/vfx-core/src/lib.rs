//! # vfx-core
//!
//! Core types for the tiled image cache and storage engine.
//!
//! This crate provides the primitives shared by the cache engine and the
//! image layer:
//!
//! - [`RectI`] - Half-open integer pixel rectangles with power-of-two scaling
//! - [`RenderScale`] - Proxy scale composed with mipmap levels
//! - [`BitDepth`], [`Sample`] - Sample depths and the conversion contract
//! - [`ImagePlaneDesc`] - Named groups of 1-4 channels
//! - [`AbortSignal`] - Cooperative render cancellation
//! - [`blend`] - Mask/mix arithmetic
//! - [`Error`], [`Result`] - The shared error type
//!
//! ## Crate Structure
//!
//! ```text
//! vfx-core (this crate)
//!    ^
//!    |
//!    +-- vfx-cache (storage backends, cache engine)
//!    |      ^
//!    |      |
//!    +-- vfx-image (tiled images, pixel kernels)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod abort;
pub mod blend;
pub mod error;
pub mod format;
pub mod pixel;
pub mod plane;
pub mod rect;
pub mod scale;

pub use half;

// Re-exports for convenience
pub use abort::AbortSignal;
pub use error::*;
pub use format::*;
pub use pixel::{PixelData, Sample, SamplesMut, SamplesRef};
pub use plane::{COLOR_PLANE_ID, ImagePlaneDesc};
pub use rect::*;
pub use scale::{MAX_MIP_LEVEL, RenderScale, mip_level_from_scale, mip_level_scale};

/// Prelude module for convenient imports.
///
/// ```
/// use vfx_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::abort::AbortSignal;
    pub use crate::error::{Error, Result};
    pub use crate::format::BitDepth;
    pub use crate::pixel::{Sample, SamplesMut, SamplesRef};
    pub use crate::plane::ImagePlaneDesc;
    pub use crate::rect::RectI;
    pub use crate::scale::RenderScale;
}
