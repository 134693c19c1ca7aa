//! Media processing for the ReelHLS packager.
//!
//! This crate wraps `ffmpeg`/`ffprobe` for:
//! - Probing source metadata
//! - Poster thumbnails
//! - Per-profile H.264/AAC transcoding
//! - HLS segmentation and master playlist assembly

pub mod command;
pub mod error;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod segment;
pub mod thumbnail;
pub mod toolkit;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use playlist::{MasterPlaylist, VariantStream};
pub use probe::{parse_frame_rate, parse_probe_output, probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use segment::read_variant_playlist;
pub use thumbnail::thumbnail_offset;
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use transcode::rendition_file_name;
