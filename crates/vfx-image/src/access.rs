//! Typed views over locked tile buffers.
//!
//! A tile owns one buffer holding every channel (packed or planar) or one
//! single-channel buffer per channel. [`Pixels`] and [`PixelsMut`] hide the
//! difference: they address samples by absolute pixel coordinate and image
//! channel index.
//!
//! Locking happens per buffer through [`LockedTile`] / [`LockedTileMut`].
//! Views borrow from those guards.

use smallvec::SmallVec;
use vfx_cache::{PixelStorage, SampleLayout, SampleReadGuard, SampleWriteGuard, StorageBuffer};
use vfx_core::{BitDepth, Error, RectI, Result, Sample};

/// Where image channel `c` lives: `(buffer index, component in buffer)`.
pub(crate) type ChannelMap = [Option<(usize, usize)>; 4];

/// Sample arrangement of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub bounds: RectI,
    pub components: usize,
    pub layout: SampleLayout,
}

impl Geometry {
    pub fn of(buffer: &StorageBuffer) -> Self {
        Self {
            bounds: buffer.bounds(),
            components: buffer.num_components(),
            layout: buffer.layout(),
        }
    }

    fn planar(&self) -> bool {
        self.layout == SampleLayout::Planar && self.components > 1
    }

    /// Samples per row of one slice.
    fn row_len(&self) -> usize {
        if self.planar() {
            self.bounds.width() as usize
        } else {
            self.bounds.width() as usize * self.components
        }
    }

    #[inline]
    fn index(&self, x: i32, y: i32, c: usize) -> (usize, usize) {
        let w = self.bounds.width() as usize;
        let px = (y - self.bounds.y1) as usize * w + (x - self.bounds.x1) as usize;
        if self.planar() { (c, px) } else { (0, px * self.components + c) }
    }
}

fn plane_slices<'a, T>(data: &'a [T], geom: &Geometry) -> SmallVec<[&'a [T]; 4]> {
    if geom.planar() {
        let plane = geom.bounds.area() as usize;
        data.chunks(plane.max(1)).take(geom.components).collect()
    } else {
        smallvec::smallvec![data]
    }
}

fn plane_slices_mut<'a, T>(data: &'a mut [T], geom: &Geometry) -> SmallVec<[&'a mut [T]; 4]> {
    if geom.planar() {
        let plane = geom.bounds.area() as usize;
        data.chunks_mut(plane.max(1)).take(geom.components).collect()
    } else {
        smallvec::smallvec![data]
    }
}

/// Read-only samples of one buffer.
#[derive(Debug)]
pub(crate) struct Planes<'a, T> {
    geom: Geometry,
    data: SmallVec<[&'a [T]; 4]>,
}

impl<'a, T: Sample> Planes<'a, T> {
    pub fn new(data: &'a [T], geom: Geometry) -> Self {
        Self { data: plane_slices(data, &geom), geom }
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, c: usize) -> T {
        let (p, i) = self.geom.index(x, y, c);
        self.data[p][i]
    }
}

/// Mutable samples of one buffer.
#[derive(Debug)]
pub(crate) struct PlanesMut<'a, T> {
    geom: Geometry,
    data: SmallVec<[&'a mut [T]; 4]>,
}

impl<'a, T: Sample> PlanesMut<'a, T> {
    pub fn new(data: &'a mut [T], geom: Geometry) -> Self {
        Self { data: plane_slices_mut(data, &geom), geom }
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, c: usize) -> T {
        let (p, i) = self.geom.index(x, y, c);
        self.data[p][i]
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, c: usize, v: T) {
        let (p, i) = self.geom.index(x, y, c);
        self.data[p][i] = v;
    }

    /// Splits into disjoint views, one per row band.
    ///
    /// `bands` must be sorted by `y1`, non-overlapping and inside the rows of
    /// this view. Each result spans the full width of the buffer.
    pub fn split_rows(self, bands: &[RectI]) -> Vec<PlanesMut<'a, T>> {
        let geom = self.geom;
        let row_len = geom.row_len();
        let mut out: Vec<PlanesMut<'a, T>> = bands
            .iter()
            .map(|b| PlanesMut {
                geom: Geometry {
                    bounds: RectI::new(geom.bounds.x1, b.y1, geom.bounds.x2, b.y2),
                    ..geom
                },
                data: SmallVec::new(),
            })
            .collect();
        for plane in self.data {
            let mut rest = plane;
            let mut cursor = geom.bounds.y1;
            for (band, view) in bands.iter().zip(out.iter_mut()) {
                debug_assert!(band.y1 >= cursor && band.y2 <= geom.bounds.y2);
                let skip = (band.y1 - cursor) as usize * row_len;
                let take = (band.y2 - band.y1) as usize * row_len;
                let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
                let (head, tail) = tail.split_at_mut(take);
                view.data.push(head);
                rest = tail;
                cursor = band.y2;
            }
        }
        out
    }
}

/// Read-only samples of a tile addressed by image channel.
#[derive(Debug)]
pub(crate) struct Pixels<'a, T> {
    planes: SmallVec<[Planes<'a, T>; 4]>,
    map: ChannelMap,
}

impl<'a, T: Sample> Pixels<'a, T> {
    /// Sample of channel `c`, `None` when the tile has no buffer for it.
    #[inline]
    pub fn get(&self, x: i32, y: i32, c: usize) -> Option<T> {
        let (b, k) = self.map.get(c).copied().flatten()?;
        Some(self.planes[b].get(x, y, k))
    }

    /// Normalized sample of channel `c`, zero when missing.
    #[inline]
    pub fn get_f32(&self, x: i32, y: i32, c: usize) -> f32 {
        self.get(x, y, c).map(T::to_f32).unwrap_or(0.0)
    }
}

/// Mutable samples of a tile addressed by image channel.
#[derive(Debug)]
pub(crate) struct PixelsMut<'a, T> {
    planes: SmallVec<[PlanesMut<'a, T>; 4]>,
    map: ChannelMap,
}

impl<'a, T: Sample> PixelsMut<'a, T> {
    #[inline]
    pub fn get(&self, x: i32, y: i32, c: usize) -> Option<T> {
        let (b, k) = self.map.get(c).copied().flatten()?;
        Some(self.planes[b].get(x, y, k))
    }

    /// Writes channel `c`; missing channels are skipped.
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, c: usize, v: T) {
        if let Some((b, k)) = self.map.get(c).copied().flatten() {
            self.planes[b].set(x, y, k, v);
        }
    }

    #[inline]
    pub fn set_f32(&mut self, x: i32, y: i32, c: usize, v: f32) {
        self.set(x, y, c, T::from_f32(v));
    }

    /// Splits a single-buffer view into row bands.
    pub fn split_rows(self, bands: &[RectI]) -> Vec<PixelsMut<'a, T>> {
        let map = self.map;
        let mut per_band: Vec<SmallVec<[PlanesMut<'a, T>; 4]>> = bands.iter().map(|_| SmallVec::new()).collect();
        for planes in self.planes {
            for (i, band) in planes.split_rows(bands).into_iter().enumerate() {
                per_band[i].push(band);
            }
        }
        per_band.into_iter().map(|planes| PixelsMut { planes, map }).collect()
    }
}

/// Read guards over every buffer of a tile.
pub(crate) struct LockedTile<'a> {
    guards: SmallVec<[SampleReadGuard<'a>; 4]>,
    geoms: SmallVec<[Geometry; 4]>,
    map: ChannelMap,
    depth: BitDepth,
}

impl<'a> LockedTile<'a> {
    pub fn lock(buffers: &[&'a StorageBuffer], map: ChannelMap) -> Result<Self> {
        let depth = buffers.first().map(|b| b.bit_depth()).ok_or(Error::NotAllocated)?;
        let mut guards = SmallVec::new();
        let mut geoms = SmallVec::new();
        for b in buffers {
            geoms.push(Geometry::of(b));
            guards.push(b.read()?);
        }
        Ok(Self { guards, geoms, map, depth })
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    /// Typed view; `None` when `T` is not the tile's sample type.
    pub fn pixels<T: Sample>(&self) -> Option<Pixels<'_, T>> {
        let mut planes = SmallVec::new();
        for (g, geom) in self.guards.iter().zip(&self.geoms) {
            planes.push(Planes::new(T::slice(g.samples())?, *geom));
        }
        Some(Pixels { planes, map: self.map })
    }
}

/// Write guards over every buffer of a tile.
pub(crate) struct LockedTileMut<'a> {
    guards: SmallVec<[SampleWriteGuard<'a>; 4]>,
    geoms: SmallVec<[Geometry; 4]>,
    map: ChannelMap,
    depth: BitDepth,
}

impl<'a> LockedTileMut<'a> {
    pub fn lock(buffers: &[&'a StorageBuffer], map: ChannelMap) -> Result<Self> {
        let depth = buffers.first().map(|b| b.bit_depth()).ok_or(Error::NotAllocated)?;
        let mut guards = SmallVec::new();
        let mut geoms = SmallVec::new();
        for b in buffers {
            geoms.push(Geometry::of(b));
            guards.push(b.write()?);
        }
        Ok(Self { guards, geoms, map, depth })
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    pub fn pixels_mut<T: Sample>(&mut self) -> Option<PixelsMut<'_, T>> {
        let mut planes = SmallVec::new();
        for (g, geom) in self.guards.iter_mut().zip(&self.geoms) {
            planes.push(PlanesMut::new(T::slice_mut(g.samples_mut())?, *geom));
        }
        Some(PixelsMut { planes, map: self.map })
    }
}

/// Normalized samples of a rectangle, packed by image channel.
#[derive(Debug, Clone)]
pub struct Region {
    rect: RectI,
    components: usize,
    data: Vec<f32>,
}

impl Region {
    /// Zeroed region.
    pub fn new(rect: RectI, components: usize) -> Self {
        Self {
            rect,
            components,
            data: vec![0.0; rect.area() as usize * components],
        }
    }

    /// Wraps packed samples.
    pub fn from_vec(rect: RectI, components: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rect.area() as usize * components {
            return Err(Error::buffer_mismatch(format!(
                "{} samples for {rect} x {components}",
                data.len()
            )));
        }
        Ok(Self { rect, components, data })
    }

    /// Covered rectangle.
    pub fn rect(&self) -> RectI {
        self.rect
    }

    /// Channels per pixel.
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    fn index(&self, x: i32, y: i32, c: usize) -> usize {
        ((y - self.rect.y1) as usize * self.rect.width() as usize + (x - self.rect.x1) as usize) * self.components + c
    }

    /// Sample at `(x, y)`; zero outside the rectangle.
    #[inline]
    pub fn get(&self, x: i32, y: i32, c: usize) -> f32 {
        if c < self.components && self.rect.contains_point(x, y) {
            self.data[self.index(x, y, c)]
        } else {
            0.0
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, x: i32, y: i32, c: usize, v: f32) {
        let i = self.index(x, y, c);
        self.data[i] = v;
    }

    /// Packed samples.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Packed RGBA texels: channel `c` goes to texel component `c`.
    pub(crate) fn to_texels(&self) -> Vec<f32> {
        if self.components == 4 {
            return self.data.clone();
        }
        let mut out = vec![0.0f32; self.rect.area() as usize * 4];
        for (texel, px) in out.chunks_exact_mut(4).zip(self.data.chunks_exact(self.components)) {
            texel[..self.components].copy_from_slice(px);
        }
        out
    }

    /// Inverse of [`to_texels`](Self::to_texels).
    pub(crate) fn from_texels(rect: RectI, components: usize, texels: &[f32]) -> Result<Self> {
        let mut region = Self::new(rect, components);
        if texels.len() != region.data.len() / components.max(1) * 4 {
            return Err(Error::buffer_mismatch(format!(
                "{} texels for {rect}",
                texels.len() / 4
            )));
        }
        for (px, texel) in region.data.chunks_exact_mut(components).zip(texels.chunks_exact(4)) {
            px.copy_from_slice(&texel[..components]);
        }
        Ok(region)
    }

    /// Copy of the samples inside `rect`.
    pub(crate) fn crop(&self, rect: RectI) -> Region {
        let mut out = Region::new(rect, self.components);
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                for c in 0..self.components {
                    out.set(x, y, c, self.get(x, y, c));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_and_planar_index() {
        let bounds = RectI::new(10, 20, 13, 22);
        let packed = Geometry { bounds, components: 2, layout: SampleLayout::Packed };
        assert_eq!(packed.index(11, 21, 1), (0, (3 + 1) * 2 + 1));
        let planar = Geometry { layout: SampleLayout::Planar, ..packed };
        assert_eq!(planar.index(11, 21, 1), (1, 4));
    }

    #[test]
    fn test_split_rows_disjoint() {
        let bounds = RectI::from_size(2, 4);
        let geom = Geometry { bounds, components: 2, layout: SampleLayout::Planar };
        let mut data = vec![0u8; 16];
        let view = PlanesMut::new(&mut data, geom);
        let bands = [RectI::new(0, 0, 2, 1), RectI::new(0, 2, 2, 4)];
        let mut parts = view.split_rows(&bands);
        parts[0].set(1, 0, 1, 7);
        parts[1].set(0, 3, 0, 9);
        drop(parts);
        assert_eq!(data[8 + 1], 7);
        assert_eq!(data[6], 9);
    }

    #[test]
    fn test_locked_tile_views() {
        let buf = StorageBuffer::allocate_ram(RectI::from_size(2, 2), BitDepth::Short, 3, SampleLayout::Packed)
            .unwrap();
        let map: ChannelMap = [Some((0, 0)), Some((0, 1)), Some((0, 2)), None];
        {
            let mut locked = LockedTileMut::lock(&[&buf], map).unwrap();
            let mut px = locked.pixels_mut::<u16>().unwrap();
            px.set(1, 1, 2, 500);
            px.set(1, 1, 3, 900);
            drop(px);
            assert!(locked.pixels_mut::<u8>().is_none());
        }
        let locked = LockedTile::lock(&[&buf], map).unwrap();
        let px = locked.pixels::<u16>().unwrap();
        assert_eq!(px.get(1, 1, 2), Some(500));
        assert_eq!(px.get(1, 1, 3), None);
        assert_eq!(px.get_f32(1, 1, 3), 0.0);
    }

    #[test]
    fn test_texels_round_trip() {
        let rect = RectI::from_size(2, 1);
        let region = Region::from_vec(rect, 2, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let texels = region.to_texels();
        assert_eq!(texels, vec![0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
        let back = Region::from_texels(rect, 2, &texels).unwrap();
        assert_eq!(back.as_slice(), region.as_slice());
        assert!(Region::from_texels(rect, 2, &texels[..4]).is_err());
    }

    #[test]
    fn test_region_outside_is_zero() {
        let mut r = Region::new(RectI::new(1, 1, 3, 3), 2);
        r.set(2, 2, 1, 0.5);
        assert_eq!(r.get(2, 2, 1), 0.5);
        assert_eq!(r.get(0, 0, 0), 0.0);
        assert_eq!(r.get(2, 2, 3), 0.0);
    }
}
