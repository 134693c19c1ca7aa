//! Worker error types.

use thiserror::Error;

use reelhls_media::MediaError;
use reelhls_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reelhls_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Why a job execution stopped. Any variant aborts the remaining stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scratch workspace setup failed: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("download failed: {0}")]
    Download(#[from] FetchError),

    #[error("probe failed: {0}")]
    Probe(#[source] MediaError),

    #[error("thumbnail failed: {0}")]
    Thumbnail(#[source] MediaError),

    #[error("encode failed for {quality}: {source}")]
    Encode {
        quality: String,
        #[source]
        source: MediaError,
    },

    #[error("segmenting failed for {quality}: {source}")]
    Segment {
        quality: String,
        #[source]
        source: MediaError,
    },

    #[error("master playlist failed: {0}")]
    Playlist(#[source] MediaError),

    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),
}

impl PipelineError {
    pub fn encode(quality: impl Into<String>, source: MediaError) -> Self {
        Self::Encode {
            quality: quality.into(),
            source,
        }
    }

    pub fn segment(quality: impl Into<String>, source: MediaError) -> Self {
        Self::Segment {
            quality: quality.into(),
            source,
        }
    }

    /// Short stage label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Workspace(_) => "workspace",
            PipelineError::Download(_) => "download",
            PipelineError::Probe(_) => "probe",
            PipelineError::Thumbnail(_) => "thumbnail",
            PipelineError::Encode { .. } => "encode",
            PipelineError::Segment { .. } => "segment",
            PipelineError::Playlist(_) => "playlist",
            PipelineError::Upload(_) => "upload",
        }
    }
}

/// Source download failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("no data received for {0} seconds")]
    Stalled(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(_) | FetchError::Stalled(_) | FetchError::Io(_) => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            FetchError::TooLarge { .. } => false,
        }
    }
}

/// Status callback failures. Logged, never propagated.
#[derive(Debug, Error)]
pub enum StatusCallbackError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("callback endpoint returned HTTP {0}")]
    Status(u16),
}
