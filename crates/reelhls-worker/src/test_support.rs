//! Fakes for pipeline and worker tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use reelhls_media::{MediaError, MediaResult, MediaToolkit, VideoInfo};
use reelhls_models::encoding::{segment_file_name, VARIANT_PLAYLIST_NAME};
use reelhls_models::{JobOptions, JobRecord, QualityProfile, StatusUpdate, TranscodeRequest};

use crate::error::FetchError;
use crate::fetch::SourceFetcher;
use crate::status::StatusSink;

pub const SEGMENTS_PER_RENDITION: usize = 3;

pub fn request() -> TranscodeRequest {
    TranscodeRequest::new(42u64, "https://bucket.example/in/clip.mp4", "out/42")
}

pub fn job() -> JobRecord {
    JobRecord::new(request(), JobOptions::default())
}

/// Writes small deterministic files instead of running FFmpeg.
#[derive(Debug, Default)]
pub struct FakeToolkit {
    fail_quality: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeToolkit {
    pub fn fail_transcode(&self, quality: &str) {
        *self.fail_quality.lock().unwrap() = Some(quality.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn probe(&self, source: &Path) -> MediaResult<VideoInfo> {
        self.record("probe");
        let size = tokio::fs::metadata(source).await?.len();
        Ok(VideoInfo {
            duration: 3.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".to_string(),
            size,
            bitrate: 6_000_000,
        })
    }

    async fn thumbnail(&self, _source: &Path, output: &Path, at_secs: f64) -> MediaResult<()> {
        self.record("thumbnail");
        tokio::fs::write(output, format!("jpeg@{at_secs}")).await?;
        Ok(())
    }

    async fn transcode(
        &self,
        _source: &Path,
        output: &Path,
        profile: &QualityProfile,
        dimensions: (u32, u32),
    ) -> MediaResult<()> {
        self.record(format!("transcode:{}", profile.name));
        let should_fail = self.fail_quality.lock().unwrap().as_deref() == Some(profile.name.as_str());
        if should_fail {
            return Err(MediaError::ffmpeg_failed(
                format!("encoder crashed on {}", profile.name),
                None,
                Some(1),
            ));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = format!("mp4:{}:{}x{}", profile.name, dimensions.0, dimensions.1);
        tokio::fs::write(output, body).await?;
        Ok(())
    }

    async fn segment(&self, rendition: &Path, segments_dir: &Path) -> MediaResult<Vec<PathBuf>> {
        let quality = rendition
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("segment:{quality}"));

        tokio::fs::create_dir_all(segments_dir).await?;
        let source = tokio::fs::read(rendition).await?;

        let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n");
        let mut paths = Vec::new();
        for index in 0..SEGMENTS_PER_RENDITION {
            let name = segment_file_name(index);
            let path = segments_dir.join(&name);
            let mut bytes = source.clone();
            bytes.extend_from_slice(format!(":{index}").as_bytes());
            tokio::fs::write(&path, bytes).await?;

            playlist.push_str(&format!("#EXTINF:1.000000,\n{name}\n"));
            paths.push(path);
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        tokio::fs::write(segments_dir.join(VARIANT_PLAYLIST_NAME), playlist).await?;

        Ok(paths)
    }
}

/// Writes fixed bytes, or fails with a configured HTTP status.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    fail_status: Mutex<Option<u16>>,
}

impl FakeFetcher {
    pub fn fail_with_status(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let fail_status = *self.fail_status.lock().unwrap();
        if let Some(status) = fail_status {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = format!("source:{url}");
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Keeps every update it receives.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatusSink {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn report(&self, update: &StatusUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}
