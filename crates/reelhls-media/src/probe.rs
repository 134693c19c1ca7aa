//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Frame rate assumed when the container reports none we can parse.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Display width in pixels (rotation applied)
    pub width: u32,
    /// Display height in pixels (rotation applied)
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

impl VideoInfo {
    /// Display aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: Option<StreamTags>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct StreamTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    fn rotation_degrees(&self) -> i64 {
        let from_side_data = self.side_data_list.iter().find_map(|d| d.rotation);
        let from_tag = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<f64>().ok());

        from_side_data
            .or(from_tag)
            .map(|deg| (deg.round() as i64).rem_euclid(360))
            .unwrap_or(0)
    }
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let info = parse_probe_output(&output.stdout)?;
    debug!(
        width = info.width,
        height = info.height,
        duration = info.duration,
        codec = %info.codec,
        "Probed {}",
        path.display()
    );
    Ok(info)
}

/// Interpret `ffprobe -print_format json` output.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::no_video_stream("no video stream found"))?;

    let (mut width, mut height) = match (video_stream.width, video_stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(MediaError::no_video_stream(
                "video stream reports no frame dimensions",
            ))
        }
    };

    if matches!(video_stream.rotation_degrees(), 90 | 270) {
        std::mem::swap(&mut width, &mut height);
    }

    let format = probe.format.as_ref();

    let duration = format
        .and_then(|f| f.duration.as_deref())
        .or(video_stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bitrate = format
        .and_then(|f| f.bit_rate.as_deref())
        .or(video_stream.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = [&video_stream.avg_frame_rate, &video_stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|r| parse_frame_rate(r))
        .unwrap_or(DEFAULT_FRAME_RATE);

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
        bitrate,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
///
/// Only plain numbers are accepted; a zero denominator or anything that is not
/// a positive finite rate yields `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let s = s.trim();
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(stream: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "format": {"duration": "12.500000", "size": "1048576", "bit_rate": "671088"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                stream
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_frame_rate_rejects_garbage() {
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("30/0"), None);
        assert_eq!(parse_frame_rate("__import__('os')"), None);
        assert_eq!(parse_frame_rate("1+1"), None);
        assert_eq!(parse_frame_rate(""), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = sample(serde_json::json!({
            "codec_type": "video",
            "codec_name": "h264",
            "width": 1920,
            "height": 1080,
            "avg_frame_rate": "0/0",
            "r_frame_rate": "25/1"
        }));

        let info = parse_probe_output(&json).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.size, 1_048_576);
        assert_eq!(info.bitrate, 671_088);
        assert!((info.duration - 12.5).abs() < 1e-9);
        assert!((info.fps - 25.0).abs() < 1e-9);
        assert!((info.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotated_stream_swaps_dimensions() {
        let json = sample(serde_json::json!({
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "side_data_list": [{"rotation": -90}]
        }));
        let info = parse_probe_output(&json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let json = sample(serde_json::json!({
            "codec_type": "video",
            "width": 1280,
            "height": 720,
            "tags": {"rotate": "180"}
        }));
        let info = parse_probe_output(&json).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn test_missing_video_stream_is_an_error() {
        let json = serde_json::to_vec(&serde_json::json!({
            "format": {"duration": "3.0"},
            "streams": [{"codec_type": "audio"}]
        }))
        .unwrap();
        assert!(matches!(
            parse_probe_output(&json),
            Err(MediaError::NoVideoStream(_))
        ));
    }

    #[test]
    fn test_zero_dimensions_is_an_error() {
        let json = sample(serde_json::json!({"codec_type": "video", "width": 0, "height": 0}));
        assert!(matches!(
            parse_probe_output(&json),
            Err(MediaError::NoVideoStream(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let result = probe_video("/definitely/not/here.mp4").await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
