//! The media operations a transcode job needs, behind one seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelhls_models::QualityProfile;
use tracing::{debug, info};

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::{probe_video, VideoInfo};
use crate::segment::{build_segment_command, read_variant_playlist};
use crate::thumbnail::generate_thumbnail;
use crate::transcode::build_transcode_command;

/// Probe, thumbnail, transcode and segment operations.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Read stream metadata of a local file.
    async fn probe(&self, source: &Path) -> MediaResult<VideoInfo>;

    /// Write a single JPEG frame taken `at_secs` into the source.
    async fn thumbnail(&self, source: &Path, output: &Path, at_secs: f64) -> MediaResult<()>;

    /// Encode `source` into `output` for one profile at `dimensions`.
    async fn transcode(
        &self,
        source: &Path,
        output: &Path,
        profile: &QualityProfile,
        dimensions: (u32, u32),
    ) -> MediaResult<()>;

    /// Split a rendition into HLS segments under `segments_dir`, returning
    /// the segment files in playback order.
    async fn segment(&self, rendition: &Path, segments_dir: &Path) -> MediaResult<Vec<PathBuf>>;
}

/// [`MediaToolkit`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
}

impl FfmpegToolkit {
    /// Create a toolkit, bounding every ffmpeg invocation by `timeout_secs` when set.
    pub fn new(timeout_secs: Option<u64>) -> Self {
        Self {
            runner: FfmpegRunner::new().with_optional_timeout(timeout_secs),
        }
    }

    /// Verify both binaries are on `PATH`.
    pub fn check_available() -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, source: &Path) -> MediaResult<VideoInfo> {
        probe_video(source).await
    }

    async fn thumbnail(&self, source: &Path, output: &Path, at_secs: f64) -> MediaResult<()> {
        generate_thumbnail(&self.runner, source, output, at_secs).await
    }

    async fn transcode(
        &self,
        source: &Path,
        output: &Path,
        profile: &QualityProfile,
        dimensions: (u32, u32),
    ) -> MediaResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = build_transcode_command(source, output, profile, dimensions);
        let quality = profile.name.clone();
        self.runner
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    quality = %quality,
                    out_time_ms = progress.out_time_ms,
                    speed = progress.speed,
                    "transcode progress"
                );
            })
            .await?;

        info!(quality = %profile.name, "Encoded {}", output.display());
        Ok(())
    }

    async fn segment(&self, rendition: &Path, segments_dir: &Path) -> MediaResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(segments_dir).await?;

        let cmd = build_segment_command(rendition, segments_dir);
        self.runner.run(&cmd).await?;

        read_variant_playlist(cmd.output_path()).await
    }
}
