//! Composite cache keys for image tiles.
//!
//! A [`TileKey`] names one tile of one channel (or of a whole packed plane)
//! produced by a computation. Two keys built from identical fields are
//! equal and hash identically; this is the only criterion the cache uses
//! to decide that data is already computed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use vfx_core::{BitDepth, RenderScale};

/// Identity of a cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    content_hash: u64,
    time_bits: u64,
    view: i32,
    channel: String,
    proxy_bits: (u64, u64),
    mip_level: u32,
    draft: bool,
    bit_depth: BitDepth,
    tile_x: i32,
    tile_y: i32,
}

#[inline]
fn canonical_bits(v: f64) -> u64 {
    // -0.0 and 0.0 name the same frame.
    if v == 0.0 { 0 } else { v.to_bits() }
}

impl TileKey {
    /// Creates a key at tile (0, 0) of mip level 0, final quality.
    pub fn new(
        content_hash: u64,
        time: f64,
        view: i32,
        channel: impl Into<String>,
        proxy_scale: RenderScale,
        bit_depth: BitDepth,
    ) -> Self {
        let (px, py) = proxy_scale.to_bits();
        Self {
            content_hash,
            time_bits: canonical_bits(time),
            view,
            channel: channel.into(),
            proxy_bits: (px, py),
            mip_level: 0,
            draft: false,
            bit_depth,
            tile_x: 0,
            tile_y: 0,
        }
    }

    /// Same key at another mip level.
    pub fn with_mip_level(mut self, level: u32) -> Self {
        self.mip_level = level;
        self
    }

    /// Same key with another quality flag.
    pub fn with_draft(mut self, draft: bool) -> Self {
        self.draft = draft;
        self
    }

    /// Same key at another tile coordinate.
    pub fn with_tile(mut self, tile_x: i32, tile_y: i32) -> Self {
        self.tile_x = tile_x;
        self.tile_y = tile_y;
        self
    }

    /// Same key for another channel name.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Hash of the producing computation.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Frame time.
    pub fn time(&self) -> f64 {
        f64::from_bits(self.time_bits)
    }

    /// View index.
    pub fn view(&self) -> i32 {
        self.view
    }

    /// Channel or plane name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Proxy scale.
    pub fn proxy_scale(&self) -> RenderScale {
        RenderScale {
            x: f64::from_bits(self.proxy_bits.0),
            y: f64::from_bits(self.proxy_bits.1),
        }
    }

    /// Mipmap level.
    pub fn mip_level(&self) -> u32 {
        self.mip_level
    }

    /// Draft quality flag.
    pub fn is_draft(&self) -> bool {
        self.draft
    }

    /// Sample depth of the cached data.
    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Tile grid coordinate.
    pub fn tile(&self) -> (i32, i32) {
        (self.tile_x, self.tile_y)
    }

    /// 64-bit digest of every field.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:016x}@{}/v{}/{}/m{}{}/{}[{},{}]",
            self.content_hash,
            self.time(),
            self.view,
            self.channel,
            self.mip_level,
            if self.draft { "d" } else { "" },
            self.bit_depth,
            self.tile_x,
            self.tile_y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TileKey {
        TileKey::new(0xfeed, 12.0, 0, "Color.R", RenderScale::IDENTITY, BitDepth::Float)
            .with_mip_level(1)
            .with_tile(3, 4)
    }

    #[test]
    fn test_identical_fields_are_equal() {
        let a = base();
        let b = base();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_each_field_changes_key() {
        let a = base();
        let variants = [
            TileKey::new(0xbeef, 12.0, 0, "Color.R", RenderScale::IDENTITY, BitDepth::Float)
                .with_mip_level(1)
                .with_tile(3, 4),
            TileKey::new(0xfeed, 13.0, 0, "Color.R", RenderScale::IDENTITY, BitDepth::Float)
                .with_mip_level(1)
                .with_tile(3, 4),
            TileKey::new(0xfeed, 12.0, 1, "Color.R", RenderScale::IDENTITY, BitDepth::Float)
                .with_mip_level(1)
                .with_tile(3, 4),
            base().with_channel("Color.G"),
            TileKey::new(0xfeed, 12.0, 0, "Color.R", RenderScale::uniform(0.5), BitDepth::Float)
                .with_mip_level(1)
                .with_tile(3, 4),
            base().with_mip_level(2),
            base().with_draft(true),
            TileKey::new(0xfeed, 12.0, 0, "Color.R", RenderScale::IDENTITY, BitDepth::Byte)
                .with_mip_level(1)
                .with_tile(3, 4),
            base().with_tile(4, 4),
            base().with_tile(3, 5),
        ];
        for v in &variants {
            assert_ne!(&a, v);
            assert_ne!(a.digest(), v.digest());
        }
    }

    #[test]
    fn test_negative_zero_time() {
        let a = TileKey::new(1, 0.0, 0, "c", RenderScale::IDENTITY, BitDepth::Byte);
        let b = TileKey::new(1, -0.0, 0, "c", RenderScale::IDENTITY, BitDepth::Byte);
        assert_eq!(a, b);
    }
}
