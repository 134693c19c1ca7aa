//! Per-profile H.264/AAC transcoding.

use std::path::Path;

use reelhls_models::encoding::{
    DEFAULT_AUDIO_CODEC, DEFAULT_CRF, DEFAULT_PRESET, DEFAULT_VIDEO_CODEC, SEGMENT_DURATION_SECS,
    WEB_OPTIMIZED_MOVFLAGS,
};
use reelhls_models::QualityProfile;

use crate::command::FfmpegCommand;

/// File name of the intermediate MP4 for one quality.
pub fn rendition_file_name(base_name: &str, quality: &str) -> String {
    format!("{}_{}.mp4", base_name, quality)
}

/// Build the transcode command for one profile at the given output size.
///
/// Keyframes are forced on every segment boundary so the segmenter can cut
/// with stream copy.
pub fn build_transcode_command(
    source: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &QualityProfile,
    (width, height): (u32, u32),
) -> FfmpegCommand {
    let buf_size = profile.video_bitrate.bits_per_second() * 2;

    FfmpegCommand::new(source, output)
        .video_filter(format!("scale={}:{}", width, height))
        .video_codec(DEFAULT_VIDEO_CODEC)
        .preset(DEFAULT_PRESET)
        .crf(DEFAULT_CRF)
        .video_bitrate(profile.video_bitrate.as_str())
        .rate_cap(profile.video_bitrate.as_str(), buf_size.to_string())
        .output_args([
            "-force_key_frames".to_string(),
            format!("expr:gte(t,n_forced*{})", SEGMENT_DURATION_SECS),
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ])
        .audio_codec(DEFAULT_AUDIO_CODEC)
        .audio_bitrate(profile.audio_bitrate.as_str())
        .movflags(WEB_OPTIMIZED_MOVFLAGS)
}
