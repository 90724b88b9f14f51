//! Image construction arguments.

use std::sync::Arc;

use vfx_cache::{Cache, SampleLayout, StorageBuffer, StorageMode, TextureContext};
use vfx_core::{AbortSignal, BitDepth, ImagePlaneDesc, RectI, RenderScale};

/// How an image reads from and writes to the tile cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// No cache interaction; every tile is allocated fresh.
    #[default]
    None,
    /// Stale entries are removed and fresh results are published.
    WriteOnly,
    /// Cached tiles are reused; missing tiles are computed and published.
    ReadWrite,
}

impl CachePolicy {
    /// Whether the image talks to the cache at all.
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Arrangement of an image's tiles and samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferFormat {
    /// One tile, channels interleaved per pixel.
    #[default]
    PackedFullRect,
    /// One tile, one plane per channel.
    CoplanarFullRect,
    /// Fixed-size grid tiles, one single-channel buffer per channel.
    MonoChannelTiled,
}

impl BufferFormat {
    /// Whether the image is split into grid tiles.
    pub fn is_tiled(&self) -> bool {
        matches!(self, Self::MonoChannelTiled)
    }

    pub(crate) fn sample_layout(&self) -> SampleLayout {
        match self {
            Self::CoplanarFullRect => SampleLayout::Planar,
            _ => SampleLayout::Packed,
        }
    }
}

/// Everything [`Image::create`](crate::Image::create) needs.
///
/// # Example
///
/// ```
/// use vfx_core::{BitDepth, ImagePlaneDesc, RectI};
/// use vfx_image::{BufferFormat, InitStorageArgs};
///
/// let args = InitStorageArgs::new(RectI::from_size(64, 64), ImagePlaneDesc::rgba())
///     .with_bit_depth(BitDepth::Short)
///     .with_buffer_format(BufferFormat::CoplanarFullRect);
/// assert_eq!(args.bit_depth, BitDepth::Short);
/// ```
#[derive(Debug, Clone)]
pub struct InitStorageArgs {
    /// Pixel bounds at the image's mip level.
    pub bounds: RectI,
    /// Backing storage.
    pub storage: StorageMode,
    /// Sample type.
    pub bit_depth: BitDepth,
    /// Plane and channel names.
    pub plane: ImagePlaneDesc,
    /// Channels that get storage in a mono-channel-tiled image.
    pub channels: [bool; 4],
    /// Cache interaction.
    pub cache_policy: CachePolicy,
    /// Tile and sample arrangement.
    pub buffer_format: BufferFormat,
    /// Global preview downsizing.
    pub proxy_scale: RenderScale,
    /// Resolution level; 0 is full scale.
    pub mip_level: u32,
    /// Draft results are acceptable and are cached as draft.
    pub is_draft: bool,
    /// Hash of the computation producing the pixels.
    pub content_hash: u64,
    /// Frame time.
    pub time: f64,
    /// View index.
    pub view: i32,
    /// Existing buffer to wrap without copying.
    pub external_buffer: Option<Arc<StorageBuffer>>,
    /// Allocate tile storage on first use instead of at creation.
    pub delay_allocation: bool,
    /// Cache handle; required unless the policy is [`CachePolicy::None`] and
    /// the storage is not disk.
    pub cache: Option<Cache>,
    /// Graphics context for texture storage.
    pub gpu_context: Option<Arc<dyn TextureContext>>,
    /// Cancellation flag of the render request.
    pub abort: Option<AbortSignal>,
}

impl InitStorageArgs {
    /// Packed float RAM image of `plane` over `bounds`, without cache access.
    pub fn new(bounds: RectI, plane: ImagePlaneDesc) -> Self {
        Self {
            bounds,
            storage: StorageMode::Ram,
            bit_depth: BitDepth::Float,
            plane,
            channels: [true; 4],
            cache_policy: CachePolicy::None,
            buffer_format: BufferFormat::PackedFullRect,
            proxy_scale: RenderScale::IDENTITY,
            mip_level: 0,
            is_draft: false,
            content_hash: 0,
            time: 0.0,
            view: 0,
            external_buffer: None,
            delay_allocation: false,
            cache: None,
            gpu_context: None,
            abort: None,
        }
    }

    /// Backing storage kind.
    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Sample type.
    pub fn with_bit_depth(mut self, depth: BitDepth) -> Self {
        self.bit_depth = depth;
        self
    }

    /// Tile and sample arrangement.
    pub fn with_buffer_format(mut self, format: BufferFormat) -> Self {
        self.buffer_format = format;
        self
    }

    /// Channels getting storage in a mono-channel-tiled image.
    pub fn with_channels(mut self, channels: [bool; 4]) -> Self {
        self.channels = channels;
        self
    }

    /// Enables cache access with `policy`.
    pub fn with_cache(mut self, cache: Cache, policy: CachePolicy) -> Self {
        self.cache = Some(cache);
        self.cache_policy = policy;
        self
    }

    /// Sets the key fields identifying the computation.
    pub fn with_key(mut self, content_hash: u64, time: f64, view: i32) -> Self {
        self.content_hash = content_hash;
        self.time = time;
        self.view = view;
        self
    }

    /// Proxy scale part of the key.
    pub fn with_proxy_scale(mut self, scale: RenderScale) -> Self {
        self.proxy_scale = scale;
        self
    }

    /// Mip level of the image.
    pub fn with_mip_level(mut self, level: u32) -> Self {
        self.mip_level = level;
        self
    }

    /// Marks the image as draft quality.
    pub fn with_draft(mut self, draft: bool) -> Self {
        self.is_draft = draft;
        self
    }

    /// Wraps `buffer` instead of allocating.
    pub fn with_external_buffer(mut self, buffer: Arc<StorageBuffer>) -> Self {
        self.external_buffer = Some(buffer);
        self
    }

    /// Postpones allocation to first use.
    pub fn with_delay_allocation(mut self, delay: bool) -> Self {
        self.delay_allocation = delay;
        self
    }

    /// Graphics context for texture storage.
    pub fn with_gpu_context(mut self, context: Arc<dyn TextureContext>) -> Self {
        self.gpu_context = Some(context);
        self
    }

    /// Cancellation flag checked by processors.
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }
}
