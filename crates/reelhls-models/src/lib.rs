//! Shared data models for the ReelHLS packager.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their queue state and retry options
//! - The quality ladder and per-job renditions
//! - Encoding and packaging constants
//! - Terminal status callback payloads

pub mod encoding;
pub mod error;
pub mod job;
pub mod quality;
pub mod rendition;
pub mod status;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{Backoff, CorrelationId, JobId, JobOptions, JobRecord, JobState, TranscodeRequest};
pub use quality::{Bitrate, QualityLadder, QualityProfile};
pub use rendition::{even_ceil, target_dimensions, Rendition};
pub use status::{CallbackStatus, StatusUpdate};
