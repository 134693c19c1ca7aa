//! HLS packaging worker.
//!
//! This crate provides:
//! - The worker coordinator consuming transcode jobs from the queue
//! - The packaging pipeline (fetch, probe, thumbnail, encode, segment, publish)
//! - Per-job scratch workspaces that never outlive their job
//! - Terminal status callbacks and lifecycle events
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod status;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use config::WorkerConfig;
pub use error::{FetchError, PipelineError, StatusCallbackError, WorkerError, WorkerResult};
pub use events::{EventBus, JobOutcome, LifecycleEvent};
pub use executor::{Worker, WorkerDeps, WorkerStatus};
pub use fetch::{FetchConfig, HttpFetcher, SourceFetcher};
pub use logging::JobLogger;
pub use pipeline::{PackageReport, Pipeline};
pub use status::{HttpStatusReporter, StatusConfig, StatusSink};
pub use workspace::ScratchWorkspace;
