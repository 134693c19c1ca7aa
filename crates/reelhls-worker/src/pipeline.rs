//! The packaging pipeline run for every job.
//!
//! Stages run strictly in order: fetch, probe, thumbnail, then transcode and
//! segment per quality profile in ladder order, master playlist, publish.
//! The first failing stage aborts the rest. The scratch workspace is removed
//! whatever the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use reelhls_media::{rendition_file_name, thumbnail_offset, MasterPlaylist, MediaToolkit, VideoInfo};
use reelhls_models::encoding::VARIANT_PLAYLIST_NAME;
use reelhls_models::{target_dimensions, JobRecord, QualityLadder, Rendition};
use reelhls_storage::{ObjectStore, PublishOptions, PublishReport, Publisher};

use crate::config::WorkerConfig;
use crate::error::PipelineError;
use crate::fetch::SourceFetcher;
use crate::logging::JobLogger;
use crate::workspace::ScratchWorkspace;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PackageReport {
    pub source: VideoInfo,
    pub renditions: Vec<Rendition>,
    pub published: PublishReport,
}

/// Turns one job into a published HLS package.
pub struct Pipeline {
    toolkit: Arc<dyn MediaToolkit>,
    fetcher: Arc<dyn SourceFetcher>,
    publisher: Publisher,
    ladder: QualityLadder,
    work_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        config: &WorkerConfig,
        toolkit: Arc<dyn MediaToolkit>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let options = PublishOptions {
            include_renditions: config.publish_renditions,
            ..PublishOptions::default()
        };

        Self {
            toolkit,
            fetcher,
            publisher: Publisher::with_options(store, options),
            ladder: config.ladder.clone(),
            work_dir: config.work_dir.clone(),
        }
    }

    pub fn ladder(&self) -> &QualityLadder {
        &self.ladder
    }

    /// Run every stage for `job` in a fresh scratch workspace.
    pub async fn run(&self, job: &JobRecord) -> Result<PackageReport, PipelineError> {
        let logger = JobLogger::new(job);

        let mut workspace = ScratchWorkspace::create(&self.work_dir, &job.id)
            .await
            .map_err(PipelineError::Workspace)?;

        let result = self
            .execute(job, &workspace, &logger)
            .instrument(logger.create_span())
            .await;

        workspace.cleanup().await;
        result
    }

    async fn execute(
        &self,
        job: &JobRecord,
        workspace: &ScratchWorkspace,
        logger: &JobLogger,
    ) -> Result<PackageReport, PipelineError> {
        let source_path = workspace.source_path();

        logger.log_stage("download", &format!("Fetching {}", job.request.source_url));
        self.fetcher.fetch(&job.request.source_url, &source_path).await?;

        let source = self
            .toolkit
            .probe(&source_path)
            .await
            .map_err(PipelineError::Probe)?;
        logger.log_stage(
            "probe",
            &format!(
                "Source is {}x{} {} at {:.2} fps, {:.1}s",
                source.width, source.height, source.codec, source.fps, source.duration
            ),
        );

        self.toolkit
            .thumbnail(&source_path, &workspace.thumbnail_path(), thumbnail_offset(source.duration))
            .await
            .map_err(PipelineError::Thumbnail)?;

        let base_name = job.request.source_base_name();
        let aspect_ratio = source.aspect_ratio();
        let mut renditions = Vec::with_capacity(self.ladder.len());

        for profile in &self.ladder {
            let quality = profile.name.as_str();
            let dimensions = target_dimensions(profile, aspect_ratio);
            let rendition_path = workspace
                .quality_dir(quality)
                .join(rendition_file_name(&base_name, quality));

            logger.log_stage(
                "encode",
                &format!("Encoding {} at {}x{}", quality, dimensions.0, dimensions.1),
            );
            self.toolkit
                .transcode(&source_path, &rendition_path, profile, dimensions)
                .await
                .map_err(|e| PipelineError::encode(quality, e))?;

            let segments_dir = workspace.segments_dir(quality);
            let segment_paths = self
                .toolkit
                .segment(&rendition_path, &segments_dir)
                .await
                .map_err(|e| PipelineError::segment(quality, e))?;
            logger.log_stage(
                "segment",
                &format!("{} split into {} segments", quality, segment_paths.len()),
            );

            renditions.push(Rendition {
                profile: profile.clone(),
                width: dimensions.0,
                height: dimensions.1,
                rendition_path,
                segment_paths,
                variant_playlist_path: segments_dir.join(VARIANT_PLAYLIST_NAME),
            });
        }

        MasterPlaylist::from_renditions(&renditions)
            .write_to(workspace.master_playlist_path())
            .await
            .map_err(PipelineError::Playlist)?;

        logger.log_stage(
            "upload",
            &format!("Publishing to {}", job.request.destination_prefix),
        );
        let published = self
            .publisher
            .publish(&workspace.output_dir(), &job.request.destination_prefix)
            .await
            .map_err(PipelineError::Upload)?;

        Ok(PackageReport {
            source,
            renditions,
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{job, FakeFetcher, FakeToolkit};
    use reelhls_storage::MemoryObjectStore;

    struct Harness {
        work_dir: tempfile::TempDir,
        toolkit: Arc<FakeToolkit>,
        fetcher: Arc<FakeFetcher>,
        store: Arc<MemoryObjectStore>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        let toolkit = Arc::new(FakeToolkit::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let store = Arc::new(MemoryObjectStore::new());
        let pipeline = Pipeline::new(&config, toolkit.clone(), fetcher.clone(), store.clone());

        Harness {
            work_dir,
            toolkit,
            fetcher,
            store,
            pipeline,
        }
    }

    fn work_dir_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.work_dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_packages_default_ladder() {
        let h = harness();
        let report = h.pipeline.run(&job()).await.unwrap();

        assert_eq!(report.renditions.len(), 4);
        let sizes: Vec<String> = report.renditions.iter().map(Rendition::resolution).collect();
        assert_eq!(sizes, ["640x360", "854x480", "1280x720", "1920x1080"]);

        let master = String::from_utf8(h.store.get("out/42/master.m3u8").unwrap().bytes).unwrap();
        assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 4);
        assert!(master.contains("720p/segments/playlist.m3u8"));

        assert!(h.store.get("out/42/thumbnail.jpg").is_some());
        assert!(h.store.get("out/42/720p/clip_720p.mp4").is_some());
        assert!(h.store.get("out/42/1080p/segments/playlist.m3u8").is_some());
        assert!(h.store.get("out/42/1080p/segments/segment_001.ts").is_some());
        assert_eq!(h.store.put_log().last().map(String::as_str), Some("out/42/master.m3u8"));
        assert_eq!(report.published.keys, h.store.keys());
        assert!(work_dir_is_empty(&h));
    }

    #[tokio::test]
    async fn test_encode_failure_at_any_index_uploads_nothing() {
        for quality in ["360p", "480p", "720p", "1080p"] {
            let h = harness();
            h.toolkit.fail_transcode(quality);

            let err = h.pipeline.run(&job()).await.unwrap_err();
            assert!(
                matches!(&err, PipelineError::Encode { quality: q, .. } if q == quality),
                "unexpected error {err}"
            );
            assert!(h.store.put_log().is_empty());
            assert!(h.store.is_empty());
            assert!(work_dir_is_empty(&h));
        }
    }

    #[tokio::test]
    async fn test_stages_stop_at_first_failure() {
        let h = harness();
        h.toolkit.fail_transcode("480p");
        h.pipeline.run(&job()).await.unwrap_err();

        assert_eq!(
            h.toolkit.calls(),
            ["probe", "thumbnail", "transcode:360p", "segment:360p", "transcode:480p"]
        );
    }

    #[tokio::test]
    async fn test_download_failure_skips_media_stages() {
        let h = harness();
        h.fetcher.fail_with_status(503);

        let err = h.pipeline.run(&job()).await.unwrap_err();
        assert_eq!(err.stage(), "download");
        assert!(h.toolkit.calls().is_empty());
        assert!(work_dir_is_empty(&h));
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_no_master() {
        let h = harness();
        h.store.fail_uploads_ending_with("segment_002.ts");

        let err = h.pipeline.run(&job()).await.unwrap_err();
        assert_eq!(err.stage(), "upload");
        assert!(h.store.get("out/42/master.m3u8").is_none());
        assert!(work_dir_is_empty(&h));
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let h = harness();
        h.pipeline.run(&job()).await.unwrap();
        let first = h.store.snapshot();

        h.pipeline.run(&job()).await.unwrap();
        assert_eq!(h.store.snapshot(), first);
    }
}
