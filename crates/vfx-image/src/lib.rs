//! # vfx-image
//!
//! Tiled images stored through the vfx tile cache.
//!
//! An [`Image`] is described by [`InitStorageArgs`]: bounds, storage kind,
//! sample depth, plane, cache policy and tile layout. Creation resolves
//! every tile against the [`Cache`](vfx_cache::Cache): cached tiles are
//! shared, the rest are reserved for the caller to compute and published
//! when the image is dropped.
//!
//! - [`Image::copy_pixels`] - Layout, depth and channel conversion
//! - [`Image::downscale_mip_map`] - 2x2 box mipmaps
//! - [`Image::apply_mask_mix`] - Blend with the unprocessed image
//! - [`Image::copy_unprocessed_channels`] - Restore untouched channels
//! - [`Image::check_for_nans`] - NaN repair
//! - [`render_preview`] - ARGB8 thumbnails
//!
//! # Example
//!
//! ```
//! use vfx_cache::Cache;
//! use vfx_core::{ImagePlaneDesc, RectI};
//! use vfx_image::{CachePolicy, Image, InitStorageArgs};
//!
//! let cache = Cache::in_memory(16 * 1024 * 1024);
//! let bounds = RectI::from_size(32, 32);
//! let args = InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
//!     .with_cache(cache.clone(), CachePolicy::ReadWrite)
//!     .with_key(0x5eed, 1.0, 0);
//!
//! let mut image = Image::create(args.clone())?;
//! let (todo, _pending) = image.rest_to_render();
//! assert_eq!(todo, vec![bounds]);
//! image.fill([0.5, 0.5, 0.5, 1.0], bounds)?;
//! drop(image);
//!
//! // Same key: the tile comes from the cache.
//! let again = Image::create(args)?;
//! assert!(again.rest_to_render().0.is_empty());
//! assert_eq!(again.pixel(3, 3), Some([0.5, 0.5, 0.5, 1.0]));
//! # Ok::<(), vfx_core::Error>(())
//! ```

#![warn(missing_docs)]

mod access;
pub mod args;
mod copy;
pub mod image;
mod kernels;
mod lookup;
pub mod mask;
mod mipmap;
pub mod parallel;
mod pixels;
pub mod preview;
pub mod tile;

pub use access::Region;
pub use args::{BufferFormat, CachePolicy, InitStorageArgs};
pub use image::{ChannelBuffer, CpuTileData, Image};
pub use kernels::convert::{ChannelSource, source_channel};
pub use mask::can_call_copy_unprocessed_channels;
pub use preview::render_preview;
pub use tile::{AllocationSpec, MonoChannelTile, Tile};
