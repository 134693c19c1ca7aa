//! Structured job logging utilities.
//!
//! Every line logged for a job carries its job ID, correlation ID and the
//! attempt number, so one job's history can be filtered out of the stream.

use tracing::{error, info, warn, Span};

use reelhls_models::JobRecord;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    correlation_id: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a logger for the current attempt of `job`.
    pub fn new(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            correlation_id: job.request.correlation_id.to_string(),
            attempt: job.attempts_made + 1,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log entry into a pipeline stage.
    pub fn log_stage(&self, stage: &str, message: &str) {
        info!(
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// 1-based number of the attempt being logged.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span wrapping the whole execution of this attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            correlation_id = %self.correlation_id,
            attempt = self.attempt
        )
    }
}
