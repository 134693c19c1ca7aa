//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reelhls_models::QualityLadder;
use tracing::warn;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub concurrency: usize,
    /// Root under which per-job scratch workspaces are created
    pub work_dir: PathBuf,
    /// How long a reserve call blocks waiting for a job
    pub reserve_block: Duration,
    /// How often delayed jobs are checked for promotion
    pub promote_interval: Duration,
    /// How often the worker scans for stalled deliveries
    pub claim_interval: Duration,
    /// Idle time after which a delivery counts as stalled
    pub stall_timeout: Duration,
    /// Interval for refreshing delivery ownership while a job runs
    pub heartbeat_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Kill an FFmpeg process that runs longer than this
    pub ffmpeg_timeout_secs: Option<u64>,
    /// Whether intermediate MP4 renditions are published
    pub publish_renditions: bool,
    /// Quality ladder applied to every job
    pub ladder: QualityLadder,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            work_dir: std::env::temp_dir().join("reelhls"),
            reserve_block: Duration::from_secs(1),
            promote_interval: Duration::from_millis(500),
            claim_interval: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(300), // 5 minutes
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            ffmpeg_timeout_secs: None,
            publish_renditions: true,
            ladder: QualityLadder::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            concurrency: env_parse("WORKER_CONCURRENCY").unwrap_or(defaults.concurrency).max(1),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            reserve_block: env_parse("WORKER_RESERVE_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reserve_block),
            promote_interval: env_parse("WORKER_PROMOTE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.promote_interval),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            stall_timeout: env_parse("WORKER_STALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stall_timeout),
            heartbeat_interval: env_parse("WORKER_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            ffmpeg_timeout_secs: env_parse("FFMPEG_TIMEOUT_SECS"),
            publish_renditions: env_parse("PUBLISH_RENDITIONS").unwrap_or(defaults.publish_renditions),
            ladder: ladder_from_env().unwrap_or(defaults.ladder),
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// `QUALITY_LADDER_JSON` overrides the default ladder, e.g.
/// `[{"name":"360p","maxHeight":360,"videoBitrate":"800k","audioBitrate":"96k"}]`.
fn ladder_from_env() -> Option<QualityLadder> {
    let raw = std::env::var("QUALITY_LADDER_JSON").ok()?;
    match QualityLadder::from_json(&raw) {
        Ok(ladder) => Some(ladder),
        Err(e) => {
            warn!("Ignoring invalid QUALITY_LADDER_JSON: {}", e);
            None
        }
    }
}
