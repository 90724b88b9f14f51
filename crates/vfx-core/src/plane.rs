//! Image plane (layer) descriptors.
//!
//! A plane groups 1 to 4 related channels, e.g. the color plane `RGBA` or
//! a single-channel mask. Two descriptors are equal when their plane ids
//! match; the channel list only describes the layout of the data.

use std::hash::{Hash, Hasher};

/// Plane id of the color plane.
pub const COLOR_PLANE_ID: &str = "Color";

/// Immutable description of an image plane.
#[derive(Debug, Clone)]
pub struct ImagePlaneDesc {
    plane_id: String,
    plane_label: String,
    channels_label: String,
    channels: Vec<String>,
}

impl ImagePlaneDesc {
    /// Creates a plane. `channels` must hold 1 to 4 names.
    pub fn new(
        plane_id: impl Into<String>,
        plane_label: impl Into<String>,
        channels_label: impl Into<String>,
        channels: &[&str],
    ) -> Self {
        debug_assert!((1..=4).contains(&channels.len()));
        Self {
            plane_id: plane_id.into(),
            plane_label: plane_label.into(),
            channels_label: channels_label.into(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Color plane with red, green, blue and alpha.
    pub fn rgba() -> Self {
        Self::new(COLOR_PLANE_ID, COLOR_PLANE_ID, "RGBA", &["R", "G", "B", "A"])
    }

    /// Color plane without alpha.
    pub fn rgb() -> Self {
        Self::new(COLOR_PLANE_ID, COLOR_PLANE_ID, "RGB", &["R", "G", "B"])
    }

    /// Alpha-only color plane.
    pub fn alpha() -> Self {
        Self::new(COLOR_PLANE_ID, COLOR_PLANE_ID, "Alpha", &["A"])
    }

    /// Two-channel plane, e.g. motion vectors.
    pub fn xy(plane_id: impl Into<String>) -> Self {
        let id = plane_id.into();
        Self::new(id.clone(), id, "XY", &["X", "Y"])
    }

    /// Color plane layout for a component count (1 = alpha, 2 = RG, 3 = RGB, 4 = RGBA).
    pub fn color_with_components(count: usize) -> Self {
        match count {
            1 => Self::alpha(),
            2 => Self::new(COLOR_PLANE_ID, COLOR_PLANE_ID, "RG", &["R", "G"]),
            3 => Self::rgb(),
            _ => Self::rgba(),
        }
    }

    /// Unique plane identifier.
    pub fn plane_id(&self) -> &str {
        &self.plane_id
    }

    /// Human readable plane label.
    pub fn plane_label(&self) -> &str {
        &self.plane_label
    }

    /// Label of the channel group, e.g. `RGBA`.
    pub fn channels_label(&self) -> &str {
        &self.channels_label
    }

    /// Ordered channel names.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Number of channels.
    pub fn num_components(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` for the color plane.
    pub fn is_color_plane(&self) -> bool {
        self.plane_id == COLOR_PLANE_ID
    }

    /// Name of the whole plane used in cache keys, e.g. `Color.RGBA`.
    pub fn cache_name(&self) -> String {
        format!("{}.{}", self.plane_id, self.channels_label)
    }

    /// Name of one channel used in cache keys, e.g. `Color.R`.
    pub fn channel_cache_name(&self, index: usize) -> String {
        match self.channels.get(index) {
            Some(name) => format!("{}.{}", self.plane_id, name),
            None => format!("{}.{}", self.plane_id, index),
        }
    }
}

impl Default for ImagePlaneDesc {
    fn default() -> Self {
        Self::rgba()
    }
}

impl PartialEq for ImagePlaneDesc {
    fn eq(&self, other: &Self) -> bool {
        self.plane_id == other.plane_id
    }
}

impl Eq for ImagePlaneDesc {}

impl Hash for ImagePlaneDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.plane_id.hash(state);
    }
}
