//! Thumbnail generation.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use reelhls_models::encoding::THUMBNAIL_SCALE_WIDTH;

/// Seek offset for the poster frame: one second in, or the midpoint of
/// clips shorter than two seconds.
pub fn thumbnail_offset(duration_secs: f64) -> f64 {
    if duration_secs.is_finite() && duration_secs > 0.0 {
        (duration_secs / 2.0).min(1.0)
    } else {
        0.0
    }
}

/// Build the single-frame JPEG extraction command.
pub fn build_thumbnail_command(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    at_secs: f64,
) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(at_secs)
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
        .output_arg("-q:v")
        .output_arg("2")
        .log_level("error")
}

/// Generate a thumbnail from a video file.
pub async fn generate_thumbnail(
    runner: &FfmpegRunner,
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    at_secs: f64,
) -> MediaResult<()> {
    let cmd = build_thumbnail_command(video_path, output_path, at_secs);
    runner.run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_offset() {
        assert_eq!(thumbnail_offset(30.0), 1.0);
        assert_eq!(thumbnail_offset(1.0), 0.5);
        assert_eq!(thumbnail_offset(0.0), 0.0);
        assert_eq!(thumbnail_offset(f64::NAN), 0.0);
    }

    #[test]
    fn test_thumbnail_command() {
        let args = build_thumbnail_command("in.mp4", "thumbnail.jpg", 1.0).build_args();
        assert!(args.contains(&"scale=640:-2".to_string()));
        assert!(args.contains(&"-frames:v".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("thumbnail.jpg"));
    }
}
