//! Per-region pixel kernels.
//!
//! A [`TileKernel`] runs in two phases per work unit: [`prepare`](TileKernel::prepare)
//! reads whatever other images it needs while no destination lock is held,
//! then [`apply`](TileKernel::apply) rewrites the destination samples of the
//! unit. [`Image::run_kernel`](crate::Image) drives the phases over tiles or
//! row bands.

use vfx_core::{RectI, Result, Sample};

use crate::access::PixelsMut;

pub(crate) mod convert;
pub(crate) mod fill;
pub(crate) mod halve;
pub(crate) mod mix;
pub(crate) mod sanitize;

/// Destination-side operation over one rectangle at a time.
pub(crate) trait TileKernel: Sync {
    /// Data gathered before the destination is locked.
    type Input: Send;

    /// Reads inputs covering `rect`.
    fn prepare(&self, rect: RectI) -> Result<Self::Input>;

    /// Rewrites `rect` of `dst`. Returns whether any sample changed.
    fn apply<T: Sample>(&self, dst: &mut PixelsMut<'_, T>, rect: RectI, input: Self::Input) -> bool;

    /// Row bands for single-tile destinations, `None` for the default split.
    fn bands(&self, _roi: RectI) -> Option<Vec<RectI>> {
        None
    }
}
