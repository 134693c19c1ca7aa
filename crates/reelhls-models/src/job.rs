//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External reel reference carried through to the status callback.
///
/// Submitters send it either as a string or as a bare number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for CorrelationId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Queued,
    /// Job failed an attempt and waits for its backoff to elapse
    Delayed,
    /// Job is being processed
    Active,
    /// Job completed successfully
    Completed,
    /// Job exhausted its attempts; retained for inspection
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exponential retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    /// Delay before the first retry, in milliseconds
    pub delay_ms: u64,
}

impl Backoff {
    pub fn exponential(delay_ms: u64) -> Self {
        Self { delay_ms }
    }

    /// Delay before re-running a job that has failed `attempts_made` times.
    ///
    /// `delay_ms * 2^(attempts_made - 1)`: 1s, 2s, 4s, ... for the default base.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(20);
        Duration::from_millis(self.delay_ms.saturating_mul(1u64 << exponent))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(1000)
    }
}

/// Retry and retention policy attached at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Total attempts, including the first run
    pub attempts: u32,
    /// Delay policy between attempts
    pub backoff: Backoff,
    /// Drop the record once the job completes
    pub remove_on_complete: bool,
    /// Drop the record once the job has exhausted its attempts
    pub remove_on_fail: bool,
    /// Stall redeliveries tolerated before the job is failed outright
    #[serde(default = "default_max_stalled_count")]
    pub max_stalled_count: u32,
}

fn default_max_stalled_count() -> u32 {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            remove_on_complete: true,
            remove_on_fail: false,
            max_stalled_count: default_max_stalled_count(),
        }
    }
}

/// Job submission contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeRequest {
    /// External reel reference
    pub correlation_id: CorrelationId,
    /// Source video URL (http or https)
    #[serde(alias = "sourceURL")]
    pub source_url: String,
    /// Object-store prefix the HLS package is published under
    pub destination_prefix: String,
}

impl TranscodeRequest {
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        source_url: impl Into<String>,
        destination_prefix: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            source_url: source_url.into(),
            destination_prefix: destination_prefix.into(),
        }
    }

    /// Reject requests the pipeline could never complete.
    pub fn validate(&self) -> ModelResult<()> {
        if self.correlation_id.as_str().trim().is_empty() {
            return Err(ModelError::MissingCorrelationId);
        }

        let url = url::Url::parse(&self.source_url)
            .map_err(|e| ModelError::InvalidSourceUrl(format!("{}: {}", self.source_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ModelError::InvalidSourceUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let prefix = self.destination_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(ModelError::InvalidDestination("prefix is empty".to_string()));
        }
        if prefix.split('/').any(|part| part == ".." || part == "." || part.is_empty()) {
            return Err(ModelError::InvalidDestination(self.destination_prefix.clone()));
        }

        Ok(())
    }

    /// Base name for rendition files, derived from the source URL path.
    ///
    /// `https://host/in/clip.mp4` gives `clip`; anything unusable gives `video`.
    pub fn source_base_name(&self) -> String {
        let stem = url::Url::parse(&self.source_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .map(|name| match name.rsplit_once('.') {
                Some((stem, _)) => stem.to_string(),
                None => name,
            })
            .unwrap_or_default();

        let sanitized: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.trim_matches('_').is_empty() {
            "video".to_string()
        } else {
            sanitized
        }
    }
}

/// A job as owned by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,
    /// Submission payload
    #[serde(flatten)]
    pub request: TranscodeRequest,
    /// Current state
    pub status: JobState,
    /// Failed attempts so far
    pub attempts_made: u32,
    /// Times the job was taken over from a worker that stopped heartbeating
    #[serde(default)]
    pub stalled_count: u32,
    /// Retry and retention policy
    pub options: JobOptions,
    /// Reason of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// When the current or last attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time a delayed job may run again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a queued job.
    pub fn new(request: TranscodeRequest, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request,
            status: JobState::Queued,
            attempts_made: 0,
            stalled_count: 0,
            options,
            failed_reason: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            finished_at: None,
            next_attempt_at: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.options.attempts.max(1)
    }

    /// Mark the job as picked up by a worker.
    pub fn activate(&mut self) -> ModelResult<()> {
        self.transition(JobState::Active, &[JobState::Queued])?;
        self.processed_at = Some(self.updated_at);
        self.next_attempt_at = None;
        Ok(())
    }

    /// Hand an active job whose worker went silent to a new worker.
    pub fn activate_stalled(&mut self) -> ModelResult<()> {
        self.transition(JobState::Active, &[JobState::Active])?;
        self.stalled_count = self.stalled_count.saturating_add(1);
        self.processed_at = Some(self.updated_at);
        Ok(())
    }

    /// Whether the job has stalled more often than its options allow.
    ///
    /// Such a job must not run again; its next failure is final.
    pub fn stall_limit_exceeded(&self) -> bool {
        self.stalled_count > self.options.max_stalled_count
    }

    /// Mark the job as successfully finished.
    pub fn complete(&mut self) -> ModelResult<()> {
        self.transition(JobState::Completed, &[JobState::Active])?;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Moves to `Delayed` with a backoff deadline while attempts remain and
    /// the stall limit holds, otherwise to the terminal `Failed` state.
    pub fn fail_attempt(&mut self, reason: impl Into<String>) -> ModelResult<JobState> {
        if self.status != JobState::Active {
            return Err(self.illegal(JobState::Failed));
        }

        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());

        if self.attempts_made < self.max_attempts() && !self.stall_limit_exceeded() {
            let delay = self.options.backoff.delay_for(self.attempts_made);
            self.transition(JobState::Delayed, &[JobState::Active])?;
            self.next_attempt_at = Some(
                self.updated_at
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            );
        } else {
            self.transition(JobState::Failed, &[JobState::Active])?;
            self.finished_at = Some(self.updated_at);
        }

        Ok(self.status)
    }

    /// Move a delayed job back to the waiting set.
    pub fn promote(&mut self) -> ModelResult<()> {
        self.transition(JobState::Queued, &[JobState::Delayed])?;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Whether a delayed job's backoff has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobState::Delayed && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    fn transition(&mut self, to: JobState, allowed_from: &[JobState]) -> ModelResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(self.illegal(to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn illegal(&self, to: JobState) -> ModelError {
        ModelError::IllegalTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TranscodeRequest {
        TranscodeRequest::new(42u64, "https://bucket.example/in/clip.mp4", "out/42")
    }

    #[test]
    fn test_correlation_id_accepts_numbers_and_strings() {
        let from_number: TranscodeRequest = serde_json::from_str(
            r#"{"correlationId":42,"sourceURL":"https://a/b.mp4","destinationPrefix":"out/42"}"#,
        )
        .unwrap();
        assert_eq!(from_number.correlation_id.as_str(), "42");

        let from_string: TranscodeRequest = serde_json::from_str(
            r#"{"correlationId":"reel-9","sourceUrl":"https://a/b.mp4","destinationPrefix":"x"}"#,
        )
        .unwrap();
        assert_eq!(from_string.correlation_id.as_str(), "reel-9");
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.source_url = "ftp://host/file.mp4".to_string();
        assert!(matches!(bad.validate(), Err(ModelError::InvalidSourceUrl(_))));

        let mut bad = request();
        bad.destination_prefix = "out/../etc".to_string();
        assert!(matches!(bad.validate(), Err(ModelError::InvalidDestination(_))));

        let mut bad = request();
        bad.correlation_id = CorrelationId::new(" ");
        assert_eq!(bad.validate(), Err(ModelError::MissingCorrelationId));
    }

    #[test]
    fn test_source_base_name() {
        assert_eq!(request().source_base_name(), "clip");

        let odd = TranscodeRequest::new("1", "https://host/a/my%20movie.final.mov?sig=1", "p");
        assert_eq!(odd.source_base_name(), "my_20movie_final");

        let bare = TranscodeRequest::new("1", "https://host/", "p");
        assert_eq!(bare.source_base_name(), "video");
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_job_lifecycle_with_retries() {
        let mut job = JobRecord::new(request(), JobOptions::default());
        assert_eq!(job.status, JobState::Queued);

        job.activate().unwrap();
        assert_eq!(job.fail_attempt("encode 720p").unwrap(), JobState::Delayed);
        assert_eq!(job.attempts_made, 1);
        assert!(job.next_attempt_at.is_some());

        job.promote().unwrap();
        job.activate().unwrap();
        assert_eq!(job.fail_attempt("encode 720p").unwrap(), JobState::Delayed);
        job.promote().unwrap();
        job.activate().unwrap();
        assert_eq!(job.fail_attempt("encode 720p").unwrap(), JobState::Failed);

        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.failed_reason.as_deref(), Some("encode 720p"));
        assert!(job.finished_at.is_some());
        assert!(job.activate().is_err());
    }

    #[test]
    fn test_stall_limit_makes_next_failure_final() {
        let mut job = JobRecord::new(request(), JobOptions::default());
        assert!(job.activate_stalled().is_err());

        job.activate().unwrap();
        job.activate_stalled().unwrap();
        assert_eq!(job.stalled_count, 1);
        assert!(!job.stall_limit_exceeded());

        job.activate_stalled().unwrap();
        assert!(job.stall_limit_exceeded());
        assert_eq!(job.fail_attempt("stalled").unwrap(), JobState::Failed);
        assert_eq!(job.attempts_made, 1);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_options_without_stall_limit_deserialize() {
        let options: JobOptions = serde_json::from_str(
            r#"{"attempts":3,"backoff":{"delayMs":1000},"removeOnComplete":true,"removeOnFail":false}"#,
        )
        .unwrap();
        assert_eq!(options, JobOptions::default());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut job = JobRecord::new(request(), JobOptions::default());
        assert!(job.complete().is_err());
        assert!(job.fail_attempt("x").is_err());
        assert!(job.promote().is_err());

        job.activate().unwrap();
        assert!(job.activate().is_err());
        job.complete().unwrap();
        assert_eq!(job.status, JobState::Completed);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let job = JobRecord::new(request(), JobOptions::default());
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"correlationId\":\"42\""));
        assert!(json.contains("\"status\":\"queued\""));
        let decoded: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, job);
    }
}
