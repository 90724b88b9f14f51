//! Tiled images backed by cache storage.
//!
//! An [`Image`] is created from [`InitStorageArgs`]. Creation validates the
//! storage combination, lays out the tile grid and runs the cache lookup for
//! every tile in parallel. Tiles found in the cache share the cached buffer;
//! the others hold a must-compute lock that is published by
//! [`push_tiles_to_cache_if_not_aborted`](Image::push_tiles_to_cache_if_not_aborted)
//! or when the image is dropped.
//!
//! # Layouts
//!
//! | format | tiles | buffer per tile |
//! |--------|-------|-----------------|
//! | [`BufferFormat::PackedFullRect`] | 1 | all channels interleaved |
//! | [`BufferFormat::CoplanarFullRect`] | 1 | all channels, one plane each |
//! | [`BufferFormat::MonoChannelTiled`] | grid | one buffer per selected channel |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};
use vfx_cache::{
    Cache, DiskTile, GpuTexture, LockStatus, PixelStorage, SampleLayout, StorageBuffer, StorageMode,
    TextureContext, WaitOutcome, tile_size_for_depth,
};
use vfx_core::abort::is_aborted;
use vfx_core::{
    AbortSignal, BitDepth, Error, ImagePlaneDesc, MAX_MIP_LEVEL, RectI, RenderScale, Result, Sample, dispatch_depth,
};

use crate::access::{LockedTileMut, Region};
use crate::args::{BufferFormat, CachePolicy, InitStorageArgs};
use crate::kernels::TileKernel;
use crate::kernels::convert;
use crate::lookup::{self, Lookup, Outcome};
use crate::parallel;
use crate::tile::{AllocationSpec, MonoChannelTile, Tile};

/// Settings fixed at creation.
#[derive(Debug, Clone)]
pub(crate) struct ImageSpec {
    pub bounds: RectI,
    pub storage: StorageMode,
    pub depth: BitDepth,
    pub plane: ImagePlaneDesc,
    pub channels: [bool; 4],
    pub policy: CachePolicy,
    pub format: BufferFormat,
    pub proxy_scale: RenderScale,
    pub mip_level: u32,
    pub draft: bool,
    pub content_hash: u64,
    pub time: f64,
    pub view: i32,
}

impl ImageSpec {
    pub fn components(&self) -> usize {
        self.plane.num_components()
    }
}

/// Buffer and component holding one channel of a tile.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    /// Backing storage.
    pub buffer: Arc<StorageBuffer>,
    /// Component of the channel inside `buffer`.
    pub component: usize,
}

/// Direct access description of one CPU tile.
#[derive(Debug, Clone)]
pub struct CpuTileData {
    /// Tile bounds, clipped to the image.
    pub bounds: RectI,
    /// Sample type.
    pub bit_depth: BitDepth,
    /// Channels of the image.
    pub num_components: usize,
    /// Storage of each channel; `None` for channels without a buffer.
    pub channels: [Option<ChannelBuffer>; 4],
}

/// An image split into cacheable tiles.
#[derive(Debug)]
pub struct Image {
    pub(crate) spec: ImageSpec,
    pub(crate) tiles: Vec<Tile>,
    pub(crate) grid: (usize, usize),
    pub(crate) cache: Option<Cache>,
    pub(crate) gpu: Option<Arc<dyn TextureContext>>,
    pub(crate) abort: Option<AbortSignal>,
}

impl Image {
    /// Creates an image and resolves its tiles against the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::AllocationFailed`] for empty bounds or when storage cannot
    ///   be allocated
    /// - [`Error::IncompatibleStorage`] for texture storage without a packed
    ///   float layout and a context, disk storage without a mono-channel
    ///   tiled layout and a disk cache, or a cache policy without a cache
    /// - [`Error::BufferMismatch`] when the external buffer does not match
    pub fn create(args: InitStorageArgs) -> Result<Image> {
        validate(&args)?;
        let InitStorageArgs {
            bounds,
            storage,
            bit_depth,
            plane,
            channels,
            cache_policy,
            buffer_format,
            proxy_scale,
            mip_level,
            is_draft,
            content_hash,
            time,
            view,
            external_buffer,
            delay_allocation,
            cache,
            gpu_context,
            abort,
        } = args;
        let mut image = Image {
            spec: ImageSpec {
                bounds,
                storage,
                depth: bit_depth,
                plane,
                channels,
                policy: cache_policy,
                format: buffer_format,
                proxy_scale,
                mip_level,
                draft: is_draft,
                content_hash,
                time,
                view,
            },
            tiles: Vec::new(),
            grid: (0, 0),
            cache,
            gpu: gpu_context,
            abort,
        };

        if let Some(buffer) = external_buffer {
            image.wrap_external(buffer)?;
            return Ok(image);
        }

        image.layout_tiles();
        if let Err(e) = image.init_tiles(delay_allocation) {
            image.abandon_locks();
            return Err(e);
        }
        if image.is_aborted() {
            let skipped = image.tiles.iter().filter(|t| t.needs_compute()).count();
            debug!(tiles = image.tiles.len(), skipped, "image creation aborted");
        }
        debug!(
            bounds = %image.spec.bounds,
            format = ?image.spec.format,
            storage = %image.spec.storage,
            depth = %image.spec.depth,
            tiles = image.tiles.len(),
            "image created"
        );
        Ok(image)
    }

    /// Wraps an existing full-rect buffer without copying.
    pub fn from_buffer(buffer: Arc<StorageBuffer>, plane: ImagePlaneDesc) -> Result<Image> {
        let format = match buffer.layout() {
            SampleLayout::Planar => BufferFormat::CoplanarFullRect,
            SampleLayout::Packed => BufferFormat::PackedFullRect,
        };
        let mut args = InitStorageArgs::new(buffer.bounds(), plane)
            .with_storage(buffer.mode())
            .with_bit_depth(buffer.bit_depth())
            .with_buffer_format(format);
        if let Some(texture) = buffer.as_texture() {
            args = args.with_gpu_context(texture.context().clone());
        }
        Image::create(args.with_external_buffer(buffer))
    }

    fn full_rect_spec(&self) -> AllocationSpec {
        let spec = &self.spec;
        match (&self.gpu, spec.storage) {
            (Some(context), StorageMode::Texture) => AllocationSpec::Texture {
                bounds: spec.bounds,
                context: context.clone(),
            },
            _ => AllocationSpec::Ram {
                bounds: spec.bounds,
                depth: spec.depth,
                components: spec.components(),
                layout: spec.format.sample_layout(),
            },
        }
    }

    fn wrap_external(&mut self, buffer: Arc<StorageBuffer>) -> Result<()> {
        let spec = &self.spec;
        let mismatch = |what: &str| Err(Error::buffer_mismatch(what.to_string()));
        if spec.format.is_tiled() {
            return mismatch("external buffers need a full-rect layout");
        }
        if buffer.mode() != spec.storage {
            return mismatch(&format!("{} buffer for {} image", buffer.mode(), spec.storage));
        }
        if buffer.bounds() != spec.bounds {
            return mismatch(&format!("buffer bounds {} for image bounds {}", buffer.bounds(), spec.bounds));
        }
        if buffer.bit_depth() != spec.depth {
            return mismatch(&format!("{} buffer for {} image", buffer.bit_depth(), spec.depth));
        }
        match buffer.as_texture() {
            Some(texture) => {
                let same = self.gpu.as_ref().is_some_and(|c| c.id() == texture.context().id());
                if !same {
                    return mismatch("texture belongs to another context");
                }
            }
            None => {
                let components = spec.components();
                if buffer.num_components() != components {
                    return mismatch(&format!(
                        "{} components for a {components}-channel image",
                        buffer.num_components()
                    ));
                }
                if components > 1 && buffer.layout() != spec.format.sample_layout() {
                    return mismatch("sample layout differs from the buffer format");
                }
            }
        }
        let mut mono = MonoChannelTile::new(None, self.full_rect_spec());
        mono.buffer = Some(buffer);
        mono.initialized = true;
        self.tiles = vec![Tile {
            bounds: spec.bounds,
            grid: (0, 0),
            channels: smallvec::smallvec![mono],
        }];
        self.grid = (1, 1);
        Ok(())
    }

    fn layout_tiles(&mut self) {
        let spec = &self.spec;
        if !spec.format.is_tiled() {
            self.tiles = vec![Tile {
                bounds: spec.bounds,
                grid: (0, 0),
                channels: smallvec::smallvec![MonoChannelTile::new(None, self.full_rect_spec())],
            }];
            self.grid = (1, 1);
            return;
        }

        let (tw, th) = tile_size_for_depth(spec.depth);
        let cells = spec.bounds.round_out_to_grid(tw, th);
        let (gx0, gy0) = (cells.x1 / tw, cells.y1 / th);
        let nx = (cells.width() / tw) as usize;
        let ny = (cells.height() / th) as usize;
        let selected: SmallVec<[usize; 4]> = (0..spec.components()).filter(|c| spec.channels[*c]).collect();

        let mut tiles = Vec::with_capacity(nx * ny);
        for j in 0..ny as i32 {
            for i in 0..nx as i32 {
                let (gx, gy) = (gx0 + i, gy0 + j);
                let cell = DiskTile::cell_bounds(spec.depth, gx, gy);
                let Some(bounds) = cell.intersect(&spec.bounds) else {
                    continue;
                };
                let channels = selected
                    .iter()
                    .map(|c| {
                        let alloc = match spec.storage {
                            StorageMode::Disk => AllocationSpec::Disk {
                                bounds: cell,
                                depth: spec.depth,
                            },
                            _ => AllocationSpec::Ram {
                                bounds: cell,
                                depth: spec.depth,
                                components: 1,
                                layout: SampleLayout::Packed,
                            },
                        };
                        MonoChannelTile::new(Some(*c), alloc)
                    })
                    .collect();
                tiles.push(Tile {
                    bounds,
                    grid: (gx, gy),
                    channels,
                });
            }
        }
        self.tiles = tiles;
        self.grid = (nx, ny);
    }

    fn init_tiles(&mut self, delay_allocation: bool) -> Result<()> {
        let cache = self.cache.as_ref();
        let lookup = match cache {
            Some(cache) if self.spec.policy.uses_cache() => Some(Lookup {
                spec: &self.spec,
                cache,
            }),
            _ => None,
        };
        parallel::for_each_mut(&mut self.tiles, self.abort.as_ref(), |tile| {
            let bounds = tile.bounds;
            let grid = tile.grid;
            for mono in tile.channels.iter_mut() {
                if let Some(lookup) = &lookup {
                    match lookup.run(bounds, grid, mono)? {
                        Outcome::Hit(buffer) => {
                            mono.buffer = Some(buffer);
                            mono.initialized = true;
                            continue;
                        }
                        Outcome::Reserved(lock) => mono.lock = Some(lock),
                        Outcome::Uncached => {}
                    }
                }
                if !delay_allocation {
                    mono.realize(cache)?;
                }
                mono.initialized = true;
            }
            Ok(())
        })
    }

    /// Zero-copy view sharing every buffer, without cache locks.
    pub fn share(&self) -> Image {
        let tiles = self
            .tiles
            .iter()
            .map(|t| Tile {
                bounds: t.bounds,
                grid: t.grid,
                channels: t
                    .channels
                    .iter()
                    .map(|m| MonoChannelTile {
                        channel: m.channel,
                        spec: m.spec.clone(),
                        buffer: m.buffer.clone(),
                        lock: None,
                        initialized: m.initialized,
                    })
                    .collect(),
            })
            .collect();
        Image {
            spec: ImageSpec {
                policy: CachePolicy::None,
                ..self.spec.clone()
            },
            tiles,
            grid: self.grid,
            cache: self.cache.clone(),
            gpu: self.gpu.clone(),
            abort: self.abort.clone(),
        }
    }

    /// Pixel bounds.
    pub fn bounds(&self) -> RectI {
        self.spec.bounds
    }

    /// Sample type.
    pub fn bit_depth(&self) -> BitDepth {
        self.spec.depth
    }

    /// Channels of the plane.
    pub fn components_count(&self) -> usize {
        self.spec.components()
    }

    /// Backing storage kind.
    pub fn storage_mode(&self) -> StorageMode {
        self.spec.storage
    }

    /// Tile and sample arrangement.
    pub fn buffer_format(&self) -> BufferFormat {
        self.spec.format
    }

    /// Plane and channel names.
    pub fn plane(&self) -> &ImagePlaneDesc {
        &self.spec.plane
    }

    /// Mip level of the pixels.
    pub fn mip_level(&self) -> u32 {
        self.spec.mip_level
    }

    /// Proxy scale of the pixels.
    pub fn proxy_scale(&self) -> RenderScale {
        self.spec.proxy_scale
    }

    /// Whether the pixels are draft quality.
    pub fn is_draft(&self) -> bool {
        self.spec.draft
    }

    /// Cache interaction of this image.
    pub fn cache_policy(&self) -> CachePolicy {
        self.spec.policy
    }

    /// Tiles in row-major order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Tile columns and rows.
    pub fn tile_grid(&self) -> (usize, usize) {
        self.grid
    }

    /// Whether the render request was cancelled.
    pub fn is_aborted(&self) -> bool {
        is_aborted(self.abort.as_ref())
    }

    pub(crate) fn is_texture(&self) -> bool {
        self.spec.storage == StorageMode::Texture
    }

    /// Buffer of a full-rect image.
    pub(crate) fn single_buffer(&self) -> Option<&Arc<StorageBuffer>> {
        match self.tiles.as_slice() {
            [tile] if !self.spec.format.is_tiled() => tile.channels.first()?.buffer(),
            _ => None,
        }
    }

    pub(crate) fn texture(&self) -> Result<&GpuTexture> {
        self.single_buffer()
            .ok_or(Error::NotAllocated)?
            .as_texture()
            .ok_or_else(|| Error::incompatible_storage("image is not texture backed"))
    }

    /// Allocates every delayed buffer of the tiles meeting `roi`.
    pub fn realize(&mut self, roi: RectI) -> Result<()> {
        let cache = self.cache.as_ref();
        self.tiles
            .iter_mut()
            .filter(|t| t.bounds.intersects(&roi))
            .try_for_each(|t| t.realize(cache))
    }

    /// Direct access to the buffers of tile `index`, allocating them if
    /// allocation was delayed.
    pub fn get_cpu_tile_data(&mut self, index: usize) -> Result<CpuTileData> {
        let components = self.components_count();
        let depth = self.bit_depth();
        let cache = self.cache.as_ref();
        let tile = self
            .tiles
            .get_mut(index)
            .ok_or_else(|| Error::other(format!("tile {index} out of range")))?;
        tile.realize(cache)?;
        let map = tile.channel_map(components);
        let mut channels: [Option<ChannelBuffer>; 4] = Default::default();
        for (slot, entry) in channels.iter_mut().zip(map) {
            let Some((b, component)) = entry else {
                continue;
            };
            let buffer = tile.channels[b].buffer().ok_or(Error::NotAllocated)?;
            if !buffer.is_cpu_accessible() {
                return Err(Error::NotCpuAccessible);
            }
            *slot = Some(ChannelBuffer {
                buffer: buffer.clone(),
                component,
            });
        }
        Ok(CpuTileData {
            bounds: tile.bounds,
            bit_depth: depth,
            num_components: components,
            channels,
        })
    }

    /// Tiles the caller still has to compute, and whether other parties are
    /// computing some tiles.
    ///
    /// Tiles skipped because the render was aborted during creation are
    /// listed too.
    pub fn rest_to_render(&self) -> (Vec<RectI>, bool) {
        let rects = self.tiles.iter().filter(|t| t.needs_compute()).map(|t| t.bounds).collect();
        let pending = self.tiles.iter().any(Tile::is_pending);
        (rects, pending)
    }

    /// Blocks until every tile computed elsewhere is published or abandoned.
    ///
    /// Published buffers replace the tile buffers. Abandoned keys are looked
    /// up again, which may hand the computation to this image. Returns
    /// whether some tile must now be computed by the caller.
    pub fn wait_for_pending_tiles(&mut self) -> Result<bool> {
        let Some(cache) = self.cache.clone() else {
            return Ok(false);
        };
        let mut released = Vec::new();
        for tile in &mut self.tiles {
            let bounds = tile.bounds;
            for mono in tile.channels.iter_mut() {
                settle(&cache, bounds, mono, &mut released)?;
            }
        }
        cache.release_later(released);
        Ok(self.tiles.iter().any(Tile::needs_compute))
    }

    /// Publishes every computed tile, unless the render was aborted.
    ///
    /// On abort the must-compute locks are released without publishing, so
    /// the next request recomputes them. Tiles whose storage was never
    /// allocated are abandoned.
    pub fn push_tiles_to_cache_if_not_aborted(&mut self) -> Result<()> {
        if self.is_aborted() {
            let dropped = self.abandon_locks();
            if dropped > 0 {
                debug!(tiles = dropped, "render aborted, dropping uncached tiles");
            }
            return Ok(());
        }
        let mut first_error = None;
        let mut pushed = 0usize;
        for mono in self.tiles.iter_mut().flat_map(|t| t.channels.iter_mut()) {
            if mono.lock_status() != Some(LockStatus::MustCompute) {
                continue;
            }
            let Some(mut lock) = mono.lock.take() else {
                continue;
            };
            match &mono.buffer {
                Some(buffer) => match lock.insert_in_cache(buffer.clone()) {
                    Ok(()) => pushed += 1,
                    Err(e) => {
                        warn!(key = %lock.key(), error = %e, "cannot cache tile");
                        first_error.get_or_insert(e);
                    }
                },
                None => lock.abandon(),
            }
        }
        if pushed > 0 {
            trace!(tiles = pushed, "tiles pushed to cache");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Releases every must-compute lock without publishing.
    fn abandon_locks(&mut self) -> usize {
        let mut dropped = 0;
        for mono in self.tiles.iter_mut().flat_map(|t| t.channels.iter_mut()) {
            if let Some(lock) = mono.lock.take() {
                if lock.status() == LockStatus::MustCompute {
                    dropped += 1;
                }
                lock.abandon();
            }
        }
        dropped
    }

    /// Normalized samples of `rect`. Pixels outside the image read as zero.
    pub fn read_region(&self, rect: RectI) -> Result<Region> {
        let components = self.components_count();
        let mut region = Region::new(rect, components);
        let Some(inside) = rect.intersect(&self.bounds()) else {
            return Ok(region);
        };
        if self.is_texture() {
            let texture = self.texture()?;
            let texels = texture.context().download(texture.id(), inside)?;
            let fetched = Region::from_texels(inside, components, &texels)?;
            if inside == rect {
                return Ok(fetched);
            }
            for y in inside.y1..inside.y2 {
                for x in inside.x1..inside.x2 {
                    for c in 0..components {
                        region.set(x, y, c, fetched.get(x, y, c));
                    }
                }
            }
            return Ok(region);
        }
        for tile in &self.tiles {
            let Some(part) = tile.bounds.intersect(&inside) else {
                continue;
            };
            let locked = tile.lock_read(components)?;
            dispatch_depth!(locked.depth(), T => {
                let px = locked.pixels::<T>().ok_or_else(depth_mismatch)?;
                convert::read_into(&px, &mut region, part);
            });
        }
        Ok(region)
    }

    /// Runs `kernel` over `roi`: per tile for tiled images, per row band for
    /// full-rect ones. Returns whether the kernel changed any sample.
    pub(crate) fn run_kernel<K: TileKernel>(&mut self, roi: RectI, kernel: &K) -> Result<bool> {
        let Some(roi) = roi.intersect(&self.bounds()) else {
            return Ok(false);
        };
        self.realize(roi)?;
        if self.is_texture() {
            return self.run_kernel_on_texture(roi, kernel);
        }
        let components = self.components_count();
        let abort = self.abort.as_ref();
        let changed = AtomicBool::new(false);

        if self.spec.format.is_tiled() {
            parallel::for_each(&self.tiles, abort, |tile| {
                let Some(rect) = tile.bounds.intersect(&roi) else {
                    return Ok(());
                };
                let input = kernel.prepare(rect)?;
                let mut locked = tile.lock_write(components)?;
                let hit = dispatch_depth!(locked.depth(), T => {
                    let mut px = locked.pixels_mut::<T>().ok_or_else(depth_mismatch)?;
                    kernel.apply(&mut px, rect, input)
                });
                if hit {
                    changed.store(true, Ordering::Relaxed);
                }
                Ok(())
            })?;
            return Ok(changed.into_inner());
        }

        let bands = kernel.bands(roi).unwrap_or_else(|| parallel::row_bands(roi));
        let inputs = parallel::map(&bands, |band| kernel.prepare(*band))?;
        let tile = self.tiles.first().ok_or(Error::NotAllocated)?;
        let mut locked = tile.lock_write(components)?;
        dispatch_depth!(locked.depth(), T => {
            let px = locked.pixels_mut::<T>().ok_or_else(depth_mismatch)?;
            let mut work: Vec<_> = px
                .split_rows(&bands)
                .into_iter()
                .zip(bands.iter().copied())
                .zip(inputs)
                .map(|((px, band), input)| (px, band, Some(input)))
                .collect();
            parallel::for_each_mut(&mut work, abort, |(px, band, input)| {
                if let Some(input) = input.take() {
                    if kernel.apply(px, *band, input) {
                        changed.store(true, Ordering::Relaxed);
                    }
                }
                Ok(())
            })?;
        });
        Ok(changed.into_inner())
    }

    /// Texture variant of [`run_kernel`](Self::run_kernel): the region goes
    /// through a host staging buffer.
    fn run_kernel_on_texture<K: TileKernel>(&mut self, roi: RectI, kernel: &K) -> Result<bool> {
        let texture = self.texture()?;
        let context = texture.context();
        let texels = context.download(texture.id(), roi)?;
        let staging = StorageBuffer::allocate_ram(roi, BitDepth::Float, 4, SampleLayout::Packed)?;
        {
            let mut guard = staging.write()?;
            let samples = f32::slice_mut(guard.samples_mut()).ok_or_else(depth_mismatch)?;
            if samples.len() != texels.len() {
                return Err(Error::buffer_mismatch(format!(
                    "downloaded {} texels for {roi}",
                    texels.len() / 4
                )));
            }
            samples.copy_from_slice(&texels);
        }
        let input = kernel.prepare(roi)?;
        let mut map = [None; 4];
        for (c, slot) in map.iter_mut().enumerate().take(self.components_count()) {
            *slot = Some((0, c));
        }
        let changed = {
            let mut locked = LockedTileMut::lock(&[&staging], map)?;
            let mut px = locked.pixels_mut::<f32>().ok_or_else(depth_mismatch)?;
            kernel.apply(&mut px, roi, input)
        };
        if changed {
            let guard = staging.read()?;
            let samples = f32::slice(guard.samples()).ok_or_else(depth_mismatch)?;
            context.upload(texture.id(), roi, samples)?;
        }
        Ok(changed)
    }

    /// Buffers shared by this image and `other`.
    pub(crate) fn shares_storage_with(&self, other: &Image) -> bool {
        let ours: Vec<&Arc<StorageBuffer>> = self.buffers().collect();
        other.buffers().any(|b| ours.iter().any(|o| Arc::ptr_eq(o, b)))
    }

    fn buffers(&self) -> impl Iterator<Item = &Arc<StorageBuffer>> {
        self.tiles
            .iter()
            .flat_map(|t| t.channels.iter())
            .filter_map(MonoChannelTile::buffer)
    }
}

/// Waits out a pending lock of `mono` and installs whatever gets published.
///
/// A published buffer that does not fit is evicted and the key reserved
/// again; this gives up after [`lookup::MAX_ATTEMPTS`] rounds.
fn settle(
    cache: &Cache,
    bounds: RectI,
    mono: &mut MonoChannelTile,
    released: &mut Vec<Arc<StorageBuffer>>,
) -> Result<()> {
    let mut rejected = 0;
    loop {
        match mono.lock_status() {
            Some(LockStatus::ComputationPending) => {
                let Some(mut lock) = mono.lock.take() else {
                    return Ok(());
                };
                if lock.wait_for_pending_entry() == WaitOutcome::Abandoned {
                    trace!(key = %lock.key(), "pending tile abandoned, retrying");
                    mono.lock = Some(cache.get(lock.key()));
                } else {
                    mono.lock = Some(lock);
                }
            }
            Some(LockStatus::Cached) => {
                let Some(lock) = mono.lock.take() else {
                    return Ok(());
                };
                let adopted = match lock.buffer() {
                    Some(buffer) => lookup::adopt(&mono.spec, &bounds, buffer.clone())?,
                    None => None,
                };
                if let Some(buffer) = adopted {
                    released.extend(mono.replace_buffer(buffer));
                    return Ok(());
                }
                rejected += 1;
                if rejected >= lookup::MAX_ATTEMPTS {
                    return Err(Error::incompatible_storage(format!(
                        "cached tile {} does not match the image",
                        lock.key()
                    )));
                }
                warn!(key = %lock.key(), "published tile does not fit, evicting");
                let key = lock.key().clone();
                drop(lock);
                cache.remove_entry(&key);
                mono.lock = Some(cache.get(&key));
            }
            _ => return Ok(()),
        }
    }
}

fn depth_mismatch() -> Error {
    Error::other("buffer depth differs from the image depth")
}

fn validate(args: &InitStorageArgs) -> Result<()> {
    if args.bounds.is_null() {
        return Err(Error::allocation_failed(0, format!("empty image bounds {}", args.bounds)));
    }
    let components = args.plane.num_components();
    if !(1..=4).contains(&components) {
        return Err(Error::incompatible_storage(format!("{components} channels")));
    }
    if args.mip_level > MAX_MIP_LEVEL {
        return Err(Error::incompatible_storage(format!(
            "mip level {} beyond {MAX_MIP_LEVEL}",
            args.mip_level
        )));
    }
    match args.storage {
        StorageMode::Texture => {
            if args.buffer_format != BufferFormat::PackedFullRect || args.bit_depth != BitDepth::Float {
                return Err(Error::incompatible_storage(
                    "texture storage needs a packed full-rect float layout",
                ));
            }
            if args.gpu_context.is_none() {
                return Err(Error::incompatible_storage("texture storage needs a graphics context"));
            }
        }
        StorageMode::Disk => {
            if args.buffer_format != BufferFormat::MonoChannelTiled {
                return Err(Error::incompatible_storage("disk storage needs a mono-channel tiled layout"));
            }
            if args.external_buffer.is_none() && !args.cache.as_ref().is_some_and(Cache::has_disk) {
                return Err(Error::incompatible_storage("disk storage needs a cache with a disk segment"));
            }
        }
        StorageMode::Ram => {}
    }
    if args.cache_policy.uses_cache() && args.cache.is_none() {
        return Err(Error::incompatible_storage(format!("{:?} cache policy without a cache", args.cache_policy)));
    }
    if args.buffer_format.is_tiled() && !args.channels.iter().take(components).any(|c| *c) {
        return Err(Error::incompatible_storage("no channel selected"));
    }
    Ok(())
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Err(e) = self.push_tiles_to_cache_if_not_aborted() {
            warn!(error = %e, "tiles left uncached");
        }
        let buffers: Vec<Arc<StorageBuffer>> = std::mem::take(&mut self.tiles)
            .into_iter()
            .flat_map(|t| t.channels)
            .filter_map(|m| m.buffer)
            .collect();
        match &self.cache {
            Some(cache) => cache.release_later(buffers),
            None => vfx_cache::release_in_background(buffers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(bounds: RectI) -> InitStorageArgs {
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
    }

    #[test]
    fn test_empty_bounds_fail() {
        let err = Image::create(rgba(RectI::default())).unwrap_err();
        assert!(err.is_allocation_error());
    }

    #[test]
    fn test_storage_combinations() {
        let bounds = RectI::from_size(8, 8);
        let texture_without_context = rgba(bounds).with_storage(StorageMode::Texture);
        assert!(matches!(
            Image::create(texture_without_context),
            Err(Error::IncompatibleStorage(_))
        ));
        let disk_full_rect = rgba(bounds).with_storage(StorageMode::Disk);
        assert!(matches!(Image::create(disk_full_rect), Err(Error::IncompatibleStorage(_))));
        let policy_without_cache = InitStorageArgs {
            cache_policy: CachePolicy::ReadWrite,
            ..rgba(bounds)
        };
        assert!(matches!(Image::create(policy_without_cache), Err(Error::IncompatibleStorage(_))));
    }

    #[test]
    fn test_full_rect_has_one_tile() {
        let image = Image::create(rgba(RectI::new(-3, 5, 700, 900))).unwrap();
        assert_eq!(image.tiles().len(), 1);
        assert_eq!(image.tile_grid(), (1, 1));
        assert_eq!(image.tiles()[0].bounds(), image.bounds());
        assert_eq!(image.tiles()[0].channels()[0].channel_index(), -1);
    }

    #[test]
    fn test_delayed_allocation() {
        let mut image = Image::create(rgba(RectI::from_size(4, 4)).with_delay_allocation(true)).unwrap();
        assert!(!image.tiles()[0].is_allocated());
        assert!(matches!(image.read_region(RectI::from_size(1, 1)), Err(Error::NotAllocated)));
        let data = image.get_cpu_tile_data(0).unwrap();
        assert!(image.tiles()[0].is_allocated());
        assert_eq!(data.num_components, 4);
        assert_eq!(data.channels[2].as_ref().map(|c| c.component), Some(2));
    }

    #[test]
    fn test_external_buffer_checks() {
        let bounds = RectI::from_size(4, 4);
        let buffer = Arc::new(StorageBuffer::allocate_ram(bounds, BitDepth::Float, 4, SampleLayout::Packed).unwrap());
        let image = Image::create(rgba(bounds).with_external_buffer(buffer.clone())).unwrap();
        assert!(Arc::ptr_eq(image.single_buffer().unwrap(), &buffer));

        let wrong_depth = rgba(bounds).with_bit_depth(BitDepth::Short).with_external_buffer(buffer.clone());
        assert!(matches!(Image::create(wrong_depth), Err(Error::BufferMismatch(_))));
        let wrong_bounds = rgba(RectI::from_size(5, 4)).with_external_buffer(buffer.clone());
        assert!(matches!(Image::create(wrong_bounds), Err(Error::BufferMismatch(_))));
        let wrong_layout = rgba(bounds)
            .with_buffer_format(BufferFormat::CoplanarFullRect)
            .with_external_buffer(buffer);
        assert!(matches!(Image::create(wrong_layout), Err(Error::BufferMismatch(_))));
    }

    #[test]
    fn test_uncached_drop_releases_buffers() {
        let image = Image::create(rgba(RectI::from_size(64, 64))).unwrap();
        let weak = Arc::downgrade(image.single_buffer().unwrap());
        drop(image);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while weak.upgrade().is_some() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_share_keeps_buffers() {
        let image = Image::create(rgba(RectI::from_size(4, 4))).unwrap();
        let view = image.share();
        assert!(view.shares_storage_with(&image));
        assert_eq!(view.cache_policy(), CachePolicy::None);
    }
}
