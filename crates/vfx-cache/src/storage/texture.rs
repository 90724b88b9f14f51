//! GPU texture storage.
//!
//! The graphics API lives behind [`TextureContext`]. Textures are always
//! RGBA `f32`, addressed in image pixel coordinates: a texture created for
//! `bounds` stores exactly the pixels of `bounds`, and every region passed
//! to the context must lie inside it.
//!
//! [`HostTextureContext`] keeps textures in host memory. It backs CPU-only
//! builds and tests, and serves as the reference for real implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;
use vfx_core::blend::{mask_mix_factor, mix_sample};
use vfx_core::{BitDepth, Error, RectI, Result};

use super::{PixelStorage, StorageMode};

/// Handle of a texture inside its context.
pub type TextureId = u64;

/// Parameters of a full-image mask/mix blend.
#[derive(Debug, Clone, Copy)]
pub struct MaskMixParams {
    /// Unprocessed image, `None` blends against zero.
    pub original: Option<TextureId>,
    /// Mask image; its alpha drives the blend.
    pub mask: Option<TextureId>,
    /// Region to blend, in pixel coordinates.
    pub roi: RectI,
    /// Global mix amount.
    pub mix: f32,
    /// Use `1 - alpha` of the mask.
    pub invert_mask: bool,
}

/// A graphics context able to hold RGBA float textures.
pub trait TextureContext: Send + Sync + fmt::Debug {
    /// Unique id of this context; textures never cross contexts.
    fn id(&self) -> u64;

    /// Creates a zeroed texture covering `bounds`.
    fn create_texture(&self, bounds: RectI) -> Result<TextureId>;

    /// Releases a texture. Unknown ids are ignored.
    fn delete_texture(&self, texture: TextureId);

    /// Writes packed RGBA samples of `region`.
    fn upload(&self, texture: TextureId, region: RectI, rgba: &[f32]) -> Result<()>;

    /// Reads packed RGBA samples of `region`.
    fn download(&self, texture: TextureId, region: RectI) -> Result<Vec<f32>>;

    /// Sets every pixel of `region` to `color`.
    fn fill(&self, texture: TextureId, region: RectI, color: [f32; 4]) -> Result<()>;

    /// Blends `dst` with the original image through the mask, in one pass.
    fn mask_mix(&self, dst: TextureId, params: &MaskMixParams) -> Result<()>;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct HostTexture {
    bounds: RectI,
    data: Vec<f32>,
}

impl HostTexture {
    fn index(&self, x: i32, y: i32) -> usize {
        ((y - self.bounds.y1) as usize * self.bounds.width() as usize + (x - self.bounds.x1) as usize) * 4
    }

    fn check(&self, region: &RectI) -> Result<()> {
        if self.bounds.contains(region) {
            Ok(())
        } else {
            Err(Error::other(format!(
                "region {region} outside texture bounds {}",
                self.bounds
            )))
        }
    }
}

/// Texture context storing textures in host memory.
#[derive(Debug)]
pub struct HostTextureContext {
    id: u64,
    next_texture: AtomicU64,
    textures: Mutex<HashMap<TextureId, HostTexture>>,
}

impl HostTextureContext {
    /// Creates a context with a fresh id.
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            next_texture: AtomicU64::new(1),
            textures: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live textures.
    pub fn texture_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TextureId, HostTexture>> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HostTextureContext {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(texture: TextureId) -> Error {
    Error::other(format!("unknown texture {texture}"))
}

impl TextureContext for HostTextureContext {
    fn id(&self) -> u64 {
        self.id
    }

    fn create_texture(&self, bounds: RectI) -> Result<TextureId> {
        let len = bounds.area() as usize * 4;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| Error::allocation_failed(len * 4, e.to_string()))?;
        data.resize(len, 0.0);
        let id = self.next_texture.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, HostTexture { bounds, data });
        trace!(context = self.id, texture = id, %bounds, "created texture");
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.lock().remove(&texture);
    }

    fn upload(&self, texture: TextureId, region: RectI, rgba: &[f32]) -> Result<()> {
        let mut textures = self.lock();
        let tex = textures.get_mut(&texture).ok_or_else(|| unknown(texture))?;
        tex.check(&region)?;
        let row = region.width() as usize * 4;
        if rgba.len() != row * region.height() as usize {
            return Err(Error::buffer_mismatch(format!(
                "{} samples for region {region}",
                rgba.len()
            )));
        }
        for (y, src) in (region.y1..region.y2).zip(rgba.chunks_exact(row)) {
            let start = tex.index(region.x1, y);
            tex.data[start..start + row].copy_from_slice(src);
        }
        Ok(())
    }

    fn download(&self, texture: TextureId, region: RectI) -> Result<Vec<f32>> {
        let textures = self.lock();
        let tex = textures.get(&texture).ok_or_else(|| unknown(texture))?;
        tex.check(&region)?;
        let row = region.width() as usize * 4;
        let mut out = Vec::with_capacity(row * region.height() as usize);
        for y in region.y1..region.y2 {
            let start = tex.index(region.x1, y);
            out.extend_from_slice(&tex.data[start..start + row]);
        }
        Ok(out)
    }

    fn fill(&self, texture: TextureId, region: RectI, color: [f32; 4]) -> Result<()> {
        let mut textures = self.lock();
        let tex = textures.get_mut(&texture).ok_or_else(|| unknown(texture))?;
        tex.check(&region)?;
        for y in region.y1..region.y2 {
            let start = tex.index(region.x1, y);
            for px in tex.data[start..start + region.width() as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
        Ok(())
    }

    fn mask_mix(&self, dst: TextureId, params: &MaskMixParams) -> Result<()> {
        let mut textures = self.lock();
        let roi = {
            let tex = textures.get(&dst).ok_or_else(|| unknown(dst))?;
            match tex.bounds.intersect(&params.roi) {
                Some(r) => r,
                None => return Ok(()),
            }
        };
        // Snapshot the read-only inputs so `dst` can be borrowed mutably.
        let fetch = |id: Option<TextureId>| -> Result<Option<(RectI, Vec<f32>)>> {
            match id {
                Some(id) => {
                    let tex = textures.get(&id).ok_or_else(|| unknown(id))?;
                    Ok(Some((tex.bounds, tex.data.clone())))
                }
                None => Ok(None),
            }
        };
        let original = fetch(params.original)?;
        let mask = fetch(params.mask)?;
        let tex = textures.get_mut(&dst).ok_or_else(|| unknown(dst))?;

        let sample = |img: &Option<(RectI, Vec<f32>)>, x: i32, y: i32, c: usize| -> Option<f32> {
            let (b, data) = img.as_ref()?;
            if !b.contains_point(x, y) {
                return Some(0.0);
            }
            let i = ((y - b.y1) as usize * b.width() as usize + (x - b.x1) as usize) * 4 + c;
            Some(data[i])
        };
        for y in roi.y1..roi.y2 {
            for x in roi.x1..roi.x2 {
                let alpha = sample(&mask, x, y, 3);
                let factor = mask_mix_factor(alpha, params.mix, params.invert_mask);
                let start = tex.index(x, y);
                for c in 0..4 {
                    let orig = sample(&original, x, y, c).unwrap_or(0.0);
                    tex.data[start + c] = mix_sample(tex.data[start + c], orig, factor);
                }
            }
        }
        Ok(())
    }
}

/// An RGBA float texture owned by a context.
///
/// The texture is deleted from its context on drop.
pub struct GpuTexture {
    context: Arc<dyn TextureContext>,
    id: TextureId,
    bounds: RectI,
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuTexture")
            .field("context", &self.context.id())
            .field("id", &self.id)
            .field("bounds", &self.bounds)
            .finish()
    }
}

impl GpuTexture {
    /// Creates a zeroed texture covering `bounds`.
    pub fn allocate(context: Arc<dyn TextureContext>, bounds: RectI) -> Result<Self> {
        if bounds.is_null() {
            return Err(Error::allocation_failed(0, format!("empty bounds {bounds}")));
        }
        let id = context.create_texture(bounds)?;
        Ok(Self { context, id, bounds })
    }

    /// Texture handle.
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Owning context.
    pub fn context(&self) -> &Arc<dyn TextureContext> {
        &self.context
    }
}

impl PixelStorage for GpuTexture {
    fn mode(&self) -> StorageMode {
        StorageMode::Texture
    }

    fn bounds(&self) -> RectI {
        self.bounds
    }

    fn bit_depth(&self) -> BitDepth {
        BitDepth::Float
    }

    fn num_components(&self) -> usize {
        4
    }

    fn size_bytes(&self) -> u64 {
        self.bounds.area() * 16
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        self.context.delete_texture(self.id);
    }
}
