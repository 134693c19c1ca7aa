//! HLS segmentation of an encoded rendition.

use std::path::{Path, PathBuf};

use reelhls_models::encoding::{SEGMENT_DURATION_SECS, SEGMENT_FILENAME_PATTERN, VARIANT_PLAYLIST_NAME};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Build the VOD segmentation command writing into `segments_dir`.
pub fn build_segment_command(rendition: impl AsRef<Path>, segments_dir: impl AsRef<Path>) -> FfmpegCommand {
    let segments_dir = segments_dir.as_ref();
    let segment_pattern = segments_dir.join(SEGMENT_FILENAME_PATTERN);

    FfmpegCommand::new(rendition, segments_dir.join(VARIANT_PLAYLIST_NAME))
        .stream_copy()
        .format("hls")
        .output_args([
            "-hls_time".to_string(),
            SEGMENT_DURATION_SECS.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_flags".to_string(),
            "independent_segments".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().to_string(),
        ])
}

/// Segment URIs listed by a media playlist, in playback order.
pub fn parse_variant_playlist(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a variant playlist and resolve its segments against its directory.
///
/// A playlist with no segments, or one naming a segment that was not
/// written, is rejected.
pub async fn read_variant_playlist(playlist_path: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let playlist_path = playlist_path.as_ref();
    let contents = tokio::fs::read_to_string(playlist_path).await?;

    let dir = playlist_path.parent().unwrap_or_else(|| Path::new("."));
    let uris = parse_variant_playlist(&contents);

    if uris.is_empty() {
        return Err(MediaError::invalid_playlist(playlist_path, "playlist lists no segments"));
    }

    let mut segments = Vec::with_capacity(uris.len());
    for uri in uris {
        if uri.contains("..") || uri.starts_with('/') {
            return Err(MediaError::invalid_playlist(
                playlist_path,
                format!("segment URI escapes the playlist directory: {}", uri),
            ));
        }
        let path = dir.join(&uri);
        if !tokio::fs::try_exists(&path).await? {
            return Err(MediaError::invalid_playlist(
                playlist_path,
                format!("segment {} was not written", uri),
            ));
        }
        segments.push(path);
    }

    Ok(segments)
}
