//! Worker metrics.
//!
//! Recorded through the `metrics` facade; the binary decides whether a
//! recorder is installed.

use ::metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "reelhls_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "reelhls_job_duration_seconds";
    pub const JOBS_RECLAIMED_TOTAL: &str = "reelhls_jobs_reclaimed_total";
    pub const JOBS_IN_FLIGHT: &str = "reelhls_jobs_in_flight";
}

/// Record one processed delivery.
pub fn record_job(outcome: &'static str, duration_secs: f64) {
    let labels = [("outcome", outcome)];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_reclaimed(count: usize) {
    counter!(names::JOBS_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
