//! Integer pixel rectangles.
//!
//! [`RectI`] is a half-open rectangle `[x1, x2) x [y1, y2)` in pixel
//! coordinates. It is the unit of every bounds, tile and region-of-interest
//! computation in the engine.
//!
//! # Coordinate System
//!
//! Coordinates are signed: images may have a region of definition that
//! starts left of or below the origin. X grows to the right, Y grows with
//! the row index.
//!
//! ```text
//! (x1,y1) ──────────┐
//!    │              │
//!    │    pixels    │
//!    │              │
//!    └────────── (x2,y2)   x2, y2 excluded
//! ```
//!
//! # Power-of-two scaling
//!
//! Mipmap levels halve the resolution. [`RectI::downscale_pow2`] rounds
//! outward ("smallest enclosing") so that repeated halving never drops
//! border pixels at odd boundaries:
//!
//! ```rust
//! use vfx_core::RectI;
//!
//! let r = RectI::new(0, 0, 5, 3);
//! assert_eq!(r.downscale_pow2(1), RectI::new(0, 0, 3, 2));
//! assert_eq!(r.downscale_pow2(2), RectI::new(0, 0, 2, 1));
//! ```

/// Floor division for signed coordinates.
#[inline]
const fn floor_div(v: i32, d: i32) -> i32 {
    v.div_euclid(d)
}

/// Ceiling division for signed coordinates.
#[inline]
const fn ceil_div(v: i32, d: i32) -> i32 {
    -((-v).div_euclid(d))
}

/// `v / 2^level`, rounded down. Any level is valid.
#[inline]
const fn shr_floor(v: i32, level: u32) -> i32 {
    let shift = if level > 32 { 32 } else { level };
    ((v as i64) >> shift) as i32
}

/// `v / 2^level`, rounded up. Any level is valid.
#[inline]
const fn shr_ceil(v: i32, level: u32) -> i32 {
    let shift = if level > 32 { 32 } else { level };
    (-((-(v as i64)) >> shift)) as i32
}

/// `v * 2^level`, saturating.
#[inline]
const fn shl_saturating(v: i32, level: u32) -> i32 {
    if v == 0 {
        return 0;
    }
    let shift = if level > 32 { 32 } else { level };
    let wide = (v as i64) << shift;
    if wide > i32::MAX as i64 {
        i32::MAX
    } else if wide < i32::MIN as i64 {
        i32::MIN
    } else {
        wide as i32
    }
}

/// Half-open integer rectangle.
///
/// # Invariants
///
/// - `x1 <= x2` and `y1 <= y2`
/// - A rectangle with zero width or height is null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RectI {
    /// Left edge (inclusive)
    pub x1: i32,
    /// Top edge (inclusive)
    pub y1: i32,
    /// Right edge (exclusive)
    pub x2: i32,
    /// Bottom edge (exclusive)
    pub y2: i32,
}

impl RectI {
    /// Creates a rectangle from its corners.
    ///
    /// Swapped corners are normalized so the invariant always holds.
    #[inline]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Creates a rectangle at the origin with the given size.
    #[inline]
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width.max(0), height.max(0))
    }

    /// Width in pixels.
    #[inline]
    pub const fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    /// Height in pixels.
    #[inline]
    pub const fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Number of pixels.
    #[inline]
    pub const fn area(&self) -> u64 {
        if self.is_null() {
            0
        } else {
            self.width() as u64 * self.height() as u64
        }
    }

    /// Returns `true` if the rectangle covers no pixel.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Returns `true` if pixel (x, y) lies inside.
    #[inline]
    pub const fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// Returns `true` if `other` lies entirely inside this rectangle.
    ///
    /// A null rectangle is contained by anything.
    #[inline]
    pub const fn contains(&self, other: &RectI) -> bool {
        other.is_null()
            || (other.x1 >= self.x1
                && other.y1 >= self.y1
                && other.x2 <= self.x2
                && other.y2 <= self.y2)
    }

    /// Returns `true` if both rectangles share at least one pixel.
    #[inline]
    pub const fn intersects(&self, other: &RectI) -> bool {
        !self.is_null()
            && !other.is_null()
            && self.x1 < other.x2
            && other.x1 < self.x2
            && self.y1 < other.y2
            && other.y1 < self.y2
    }

    /// Intersection of two rectangles, `None` if they do not overlap.
    ///
    /// ```rust
    /// use vfx_core::RectI;
    ///
    /// let a = RectI::new(0, 0, 10, 10);
    /// let b = RectI::new(5, -5, 20, 5);
    /// assert_eq!(a.intersect(&b), Some(RectI::new(5, 0, 10, 5)));
    /// assert_eq!(a.intersect(&RectI::new(10, 0, 12, 2)), None);
    /// ```
    #[inline]
    pub fn intersect(&self, other: &RectI) -> Option<RectI> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x1 < x2 && y1 < y2 {
            Some(RectI { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    /// Bounding box of both rectangles. Null operands are ignored.
    #[inline]
    pub fn merge(&self, other: &RectI) -> RectI {
        if self.is_null() {
            return *other;
        }
        if other.is_null() {
            return *self;
        }
        RectI {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Translates the rectangle.
    #[inline]
    pub const fn translate(&self, dx: i32, dy: i32) -> RectI {
        RectI {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Smallest rectangle at `level` halvings that encloses this one.
    ///
    /// Left/top edges round down, right/bottom edges round up.
    #[inline]
    pub const fn downscale_pow2(&self, level: u32) -> RectI {
        if level == 0 {
            return *self;
        }
        RectI {
            x1: shr_floor(self.x1, level),
            y1: shr_floor(self.y1, level),
            x2: shr_ceil(self.x2, level),
            y2: shr_ceil(self.y2, level),
        }
    }

    /// Rectangle at `level` doublings covering the same area.
    ///
    /// Coordinates saturate at the `i32` range.
    #[inline]
    pub const fn upscale_pow2(&self, level: u32) -> RectI {
        RectI {
            x1: shl_saturating(self.x1, level),
            y1: shl_saturating(self.y1, level),
            x2: shl_saturating(self.x2, level),
            y2: shl_saturating(self.y2, level),
        }
    }

    /// Expands the rectangle outward to multiples of the grid cell size.
    #[inline]
    pub const fn round_out_to_grid(&self, cell_w: i32, cell_h: i32) -> RectI {
        RectI {
            x1: floor_div(self.x1, cell_w) * cell_w,
            y1: floor_div(self.y1, cell_h) * cell_h,
            x2: ceil_div(self.x2, cell_w) * cell_w,
            y2: ceil_div(self.y2, cell_h) * cell_h,
        }
    }

    /// Splits the rows of this rectangle into at most `parts` contiguous bands.
    ///
    /// Bands cover the rectangle exactly and keep full scanlines.
    pub fn split_rows(&self, parts: usize) -> Vec<RectI> {
        let height = self.height().max(0) as usize;
        if height == 0 || self.width() <= 0 {
            return Vec::new();
        }
        let parts = parts.clamp(1, height);
        let base = height / parts;
        let extra = height % parts;
        let mut bands = Vec::with_capacity(parts);
        let mut y = self.y1;
        for i in 0..parts {
            let rows = (base + usize::from(i < extra)) as i32;
            bands.push(RectI {
                x1: self.x1,
                y1: y,
                x2: self.x2,
                y2: y + rows,
            });
            y += rows;
        }
        bands
    }
}

impl std::fmt::Display for RectI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}
