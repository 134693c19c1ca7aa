//! Per-job renditions and target geometry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::quality::QualityProfile;

/// Round up to the nearest even integer (H.264 4:2:0 needs even dimensions).
pub fn even_ceil(value: u32) -> u32 {
    value + (value % 2)
}

/// Compute the output frame size for a profile given the source aspect ratio.
///
/// Width is `round(max_height * aspect)` rounded up to even; height is the
/// profile height rounded up to even.
pub fn target_dimensions(profile: &QualityProfile, aspect_ratio: f64) -> (u32, u32) {
    let height = even_ceil(profile.max_height);
    let raw_width = (f64::from(profile.max_height) * aspect_ratio).round();
    let width = even_ceil(raw_width.max(2.0) as u32);
    (width, height)
}

/// One quality-specific output of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendition {
    /// Profile this rendition was produced for
    pub profile: QualityProfile,
    /// Encoded width
    pub width: u32,
    /// Encoded height
    pub height: u32,
    /// Intermediate MP4 file
    pub rendition_path: PathBuf,
    /// Segment files, in playback order
    pub segment_paths: Vec<PathBuf>,
    /// Variant playlist listing the segments
    pub variant_playlist_path: PathBuf,
}

impl Rendition {
    /// Advertised bandwidth for the master playlist.
    pub fn bandwidth(&self) -> u64 {
        self.profile.bandwidth()
    }

    /// `WIDTHxHEIGHT` as written in `RESOLUTION=`.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
