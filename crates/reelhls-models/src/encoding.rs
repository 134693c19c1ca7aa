//! Encoding and packaging constants.

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Encoder speed/quality preset used for every rendition
pub const DEFAULT_PRESET: &str = "fast";
/// Constant Rate Factor used for every rendition
pub const DEFAULT_CRF: u8 = 23;
/// Container flags that move the moov atom to the front for progressive start
pub const WEB_OPTIMIZED_MOVFLAGS: &str = "+faststart";

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 640;
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Target duration of every HLS segment, in seconds.
pub const SEGMENT_DURATION_SECS: u32 = 1;
/// Segment file name pattern handed to the muxer (`segment_000.ts`, ...).
pub const SEGMENT_FILENAME_PATTERN: &str = "segment_%03d.ts";

/// Destination layout names.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const VARIANT_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";
pub const SEGMENTS_DIR: &str = "segments";

/// Format the file name of the segment at `index`.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:03}.ts", index)
}

/// Relative path of a quality's variant playlist, as referenced by the master playlist.
pub fn variant_playlist_uri(quality: &str) -> String {
    format!("{}/{}/{}", quality, SEGMENTS_DIR, VARIANT_PLAYLIST_NAME)
}
