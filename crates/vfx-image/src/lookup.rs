//! Tile resolution against the cache.
//!
//! Candidates are tried level first, then quality: the requested mip level
//! before level 0, final quality before draft. The key matching the image
//! exactly is reserved with [`Cache::get`]; every other candidate is only
//! peeked at. A level-0 hit is downscaled and, when this image holds the
//! reservation, published under the exact key.

use std::sync::Arc;

use tracing::{trace, warn};
use vfx_cache::{
    Cache, CacheEntryLock, DiskTile, GpuTexture, LockStatus, PixelStorage, SampleLayout, StorageBuffer,
    StorageMode, TileKey,
};
use vfx_core::{BitDepth, Error, ImagePlaneDesc, MAX_MIP_LEVEL, RectI, Result, dispatch_depth};

use crate::access::{LockedTile, LockedTileMut};
use crate::args::{BufferFormat, CachePolicy};
use crate::image::{Image, ImageSpec};
use crate::tile::{AllocationSpec, MonoChannelTile};

/// Reservation rounds before a key with stale content is given up on.
pub(crate) const MAX_ATTEMPTS: usize = 2;

/// How a tile buffer was resolved.
pub(crate) enum Outcome {
    /// Cached storage to share.
    Hit(Arc<StorageBuffer>),
    /// Lock to compute under, or to wait on.
    Reserved(CacheEntryLock),
    /// No usable entry and no reservation.
    Uncached,
}

/// Result of reserving the exact key.
enum Exact {
    Hit(Arc<StorageBuffer>),
    Lock(CacheEntryLock),
    Gone,
}

/// Resolves the buffers of one image.
pub(crate) struct Lookup<'a> {
    pub spec: &'a ImageSpec,
    pub cache: &'a Cache,
}

impl Lookup<'_> {
    fn channel_name(&self, mono: &MonoChannelTile) -> String {
        let plane = &self.spec.plane;
        match mono.channel {
            Some(c) => plane.channel_cache_name(c),
            None if mono.allocation().mode() == StorageMode::Texture => format!("{}/texture", plane.cache_name()),
            None if self.spec.format == BufferFormat::CoplanarFullRect => format!("{}/planar", plane.cache_name()),
            None => plane.cache_name(),
        }
    }

    fn key(&self, mono: &MonoChannelTile, grid: (i32, i32), level: u32, draft: bool) -> TileKey {
        let spec = self.spec;
        TileKey::new(
            spec.content_hash,
            spec.time,
            spec.view,
            self.channel_name(mono),
            spec.proxy_scale,
            spec.depth,
        )
        .with_mip_level(level)
        .with_draft(draft)
        .with_tile(grid.0, grid.1)
    }

    /// Resolves one buffer of the tile at `grid` covering `bounds`.
    pub fn run(&self, bounds: RectI, grid: (i32, i32), mono: &MonoChannelTile) -> Result<Outcome> {
        let spec = self.spec;
        match spec.policy {
            CachePolicy::None => Ok(Outcome::Uncached),
            CachePolicy::WriteOnly => {
                let key = self.key(mono, grid, spec.mip_level, spec.draft);
                if self.cache.remove_entry(&key) {
                    trace!(key = %key, "replacing cached tile");
                }
                self.reserve(&key, bounds, mono).map(Outcome::from)
            }
            CachePolicy::ReadWrite => self.read_write(bounds, grid, mono),
        }
    }

    fn read_write(&self, bounds: RectI, grid: (i32, i32), mono: &MonoChannelTile) -> Result<Outcome> {
        let spec = self.spec;
        let mut levels = vec![spec.mip_level];
        if spec.mip_level > 0 && spec.storage != StorageMode::Texture && spec.depth != BitDepth::Half {
            levels.push(0);
        }
        let drafts: &[bool] = if spec.draft { &[false, true] } else { &[false] };

        let mut held = None;
        for &level in &levels {
            for &draft in drafts {
                if level == spec.mip_level && draft == spec.draft {
                    match self.reserve(&self.key(mono, grid, level, draft), bounds, mono)? {
                        Exact::Hit(buffer) => return Ok(Outcome::Hit(buffer)),
                        Exact::Lock(lock) => held = Some(lock),
                        Exact::Gone => {}
                    }
                    continue;
                }
                let found = if level == spec.mip_level {
                    self.peek_candidate(bounds, grid, mono, level, draft)
                } else {
                    self.from_level_zero(bounds, grid, mono, draft)
                };
                let buffer = match found {
                    Ok(Some(buffer)) => buffer,
                    Ok(None) => continue,
                    Err(e) => {
                        trace!(level, draft, error = %e, "cache candidate unusable");
                        continue;
                    }
                };
                if level != spec.mip_level {
                    if let Some(lock) = held.as_mut().filter(|l| l.status() == LockStatus::MustCompute) {
                        if let Err(e) = lock.insert_in_cache(buffer.clone()) {
                            warn!(key = %lock.key(), error = %e, "cannot cache downscaled tile");
                        }
                    }
                }
                return Ok(Outcome::Hit(buffer));
            }
        }
        Ok(held.map_or(Outcome::Uncached, Outcome::Reserved))
    }

    /// Reserves `key`, evicting entries that do not fit the image.
    fn reserve(&self, key: &TileKey, bounds: RectI, mono: &MonoChannelTile) -> Result<Exact> {
        for _ in 0..MAX_ATTEMPTS {
            let lock = self.cache.get(key);
            if lock.status() != LockStatus::Cached {
                return Ok(Exact::Lock(lock));
            }
            if let Some(buffer) = lock.buffer() {
                if let Some(buffer) = adopt(mono.allocation(), &bounds, buffer.clone())? {
                    return Ok(Exact::Hit(buffer));
                }
            }
            warn!(key = %key, "cached tile does not match the image, evicting");
            drop(lock);
            self.cache.remove_entry(key);
        }
        Ok(Exact::Gone)
    }

    fn peek_candidate(
        &self,
        bounds: RectI,
        grid: (i32, i32),
        mono: &MonoChannelTile,
        level: u32,
        draft: bool,
    ) -> Result<Option<Arc<StorageBuffer>>> {
        match self.cache.get_if_cached(&self.key(mono, grid, level, draft)) {
            Some(buffer) => adopt(mono.allocation(), &bounds, buffer),
            None => Ok(None),
        }
    }

    fn from_level_zero(
        &self,
        bounds: RectI,
        grid: (i32, i32),
        mono: &MonoChannelTile,
        draft: bool,
    ) -> Result<Option<Arc<StorageBuffer>>> {
        match mono.channel {
            None => self.full_rect_from_level_zero(bounds, mono, draft),
            Some(_) => self.cell_from_level_zero(grid, mono, draft),
        }
    }

    /// Downscales the cached level-0 full-rect buffer over `bounds`.
    fn full_rect_from_level_zero(
        &self,
        bounds: RectI,
        mono: &MonoChannelTile,
        draft: bool,
    ) -> Result<Option<Arc<StorageBuffer>>> {
        let level = self.spec.mip_level;
        let Some(buffer) = self.cache.get_if_cached(&self.key(mono, (0, 0), 0, draft)) else {
            return Ok(None);
        };
        if !mono.allocation().compatible(&buffer) || !buffer.bounds().downscale_pow2(level).contains(&bounds) {
            return Ok(None);
        }
        let Some(region) = bounds.upscale_pow2(level).intersect(&buffer.bounds()) else {
            return Ok(None);
        };
        let source = Image::from_buffer(buffer, self.spec.plane.clone())?;
        let scaled = source.downscale_mip_map(region, level)?;
        let result = scaled.single_buffer().cloned().ok_or(Error::NotAllocated)?;
        trace!(level, bounds = %bounds, "tile rebuilt from level 0");
        adopt(mono.allocation(), &bounds, result)
    }

    /// Rebuilds a grid cell from every level-0 cell under it.
    fn cell_from_level_zero(
        &self,
        grid: (i32, i32),
        mono: &MonoChannelTile,
        draft: bool,
    ) -> Result<Option<Arc<StorageBuffer>>> {
        let spec = self.spec;
        let level = spec.mip_level;
        let cell = DiskTile::cell_bounds(spec.depth, grid.0, grid.1);
        let covered = cell.upscale_pow2(level);

        let span = 1i32 << level.min(MAX_MIP_LEVEL);
        let first = grid.0.checked_mul(span).zip(grid.1.checked_mul(span));
        let Some((x0, y0)) = first.filter(|(x, y)| x.checked_add(span).is_some() && y.checked_add(span).is_some())
        else {
            return Ok(None);
        };

        let mut sources = Vec::new();
        for gy in y0..y0 + span {
            for gx in x0..x0 + span {
                let Some(buffer) = self.cache.get_if_cached(&self.key(mono, (gx, gy), 0, draft)) else {
                    return Ok(None);
                };
                let source_cell = DiskTile::cell_bounds(spec.depth, gx, gy);
                if !mono.allocation().compatible(&buffer) || !buffer.bounds().contains(&source_cell) {
                    return Ok(None);
                }
                sources.push((buffer, source_cell));
            }
        }

        let staging = StorageBuffer::allocate_ram(covered, spec.depth, 1, SampleLayout::Packed)?;
        for (buffer, source_cell) in &sources {
            copy_samples(buffer, &staging, *source_cell)?;
        }
        let source = Image::from_buffer(Arc::new(staging), ImagePlaneDesc::alpha())?;
        let scaled = source.downscale_mip_map(covered, level)?;
        let result = scaled.single_buffer().ok_or(Error::NotAllocated)?;

        let target = mono.allocation().clone().realize(Some(self.cache))?;
        copy_samples(result, &target, cell)?;
        trace!(level, grid = ?grid, cells = sources.len(), "cell rebuilt from level 0");
        Ok(Some(target))
    }
}

impl From<Exact> for Outcome {
    fn from(exact: Exact) -> Self {
        match exact {
            Exact::Hit(buffer) => Outcome::Hit(buffer),
            Exact::Lock(lock) => Outcome::Reserved(lock),
            Exact::Gone => Outcome::Uncached,
        }
    }
}

/// Copies `rect` between two single-channel buffers of the same depth.
fn copy_samples(src: &StorageBuffer, dst: &StorageBuffer, rect: RectI) -> Result<()> {
    let map = [Some((0, 0)), None, None, None];
    let read = LockedTile::lock(&[src], map)?;
    let mut write = LockedTileMut::lock(&[dst], map)?;
    dispatch_depth!(read.depth(), T => {
        let from = read.pixels::<T>();
        let to = write.pixels_mut::<T>();
        let (Some(from), Some(mut to)) = (from, to) else {
            return Err(Error::other("tile depths differ"));
        };
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                if let Some(v) = from.get(x, y, 0) {
                    to.set(x, y, 0, v);
                }
            }
        }
    });
    Ok(())
}

/// Makes a cached `buffer` usable for `spec` over `needed`.
///
/// Returns `None` when it does not fit. Textures owned by another context
/// are copied into a new texture of the expected context.
pub(crate) fn adopt(
    spec: &AllocationSpec,
    needed: &RectI,
    buffer: Arc<StorageBuffer>,
) -> Result<Option<Arc<StorageBuffer>>> {
    if !spec.accepts(&buffer, needed) {
        return Ok(None);
    }
    if let (AllocationSpec::Texture { context, .. }, Some(texture)) = (spec, buffer.as_texture()) {
        if texture.context().id() != context.id() {
            let bounds = buffer.bounds();
            let texels = texture.context().download(texture.id(), bounds)?;
            let local = GpuTexture::allocate(context.clone(), bounds)?;
            context.upload(local.id(), bounds, &texels)?;
            trace!(from = texture.context().id(), to = context.id(), "texture moved between contexts");
            return Ok(Some(Arc::new(local.into())));
        }
    }
    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfx_cache::HostTextureContext;

    #[test]
    fn test_adopt_rejects_small_buffers() {
        let spec = AllocationSpec::Ram {
            bounds: RectI::from_size(8, 8),
            depth: BitDepth::Float,
            components: 4,
            layout: SampleLayout::Packed,
        };
        let small = Arc::new(StorageBuffer::allocate_ram(RectI::from_size(4, 4), BitDepth::Float, 4, SampleLayout::Packed).unwrap());
        assert!(adopt(&spec, &RectI::from_size(8, 8), small.clone()).unwrap().is_none());
        assert!(adopt(&spec, &RectI::from_size(4, 4), small).unwrap().is_some());
    }

    #[test]
    fn test_adopt_moves_foreign_textures() {
        let bounds = RectI::from_size(2, 2);
        let home: Arc<dyn vfx_cache::TextureContext> = Arc::new(HostTextureContext::new());
        let away: Arc<dyn vfx_cache::TextureContext> = Arc::new(HostTextureContext::new());
        let texture = GpuTexture::allocate(away.clone(), bounds).unwrap();
        away.fill(texture.id(), bounds, [0.25, 0.5, 0.75, 1.0]).unwrap();
        let foreign = Arc::new(StorageBuffer::from(texture));

        let spec = AllocationSpec::Texture { bounds, context: home.clone() };
        let adopted = adopt(&spec, &bounds, foreign).unwrap().unwrap();
        let local = adopted.as_texture().unwrap();
        assert_eq!(local.context().id(), home.id());
        let texels = home.download(local.id(), bounds).unwrap();
        assert_eq!(&texels[..4], &[0.25, 0.5, 0.75, 1.0]);
    }
}
