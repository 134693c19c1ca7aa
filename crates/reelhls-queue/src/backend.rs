//! The job queue seam.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelhls_models::{JobId, JobOptions, JobRecord, TranscodeRequest};
use serde::{Deserialize, Serialize};

use crate::error::QueueResult;

/// A job handed to one worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue-side handle used to acknowledge this delivery
    pub delivery_id: String,
    /// The job as of the moment it was activated
    pub job: JobRecord,
    /// Whether this delivery was reclaimed from a stalled worker
    pub redelivered: bool,
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The job will run again once `delay` has elapsed.
    Retry {
        attempts_made: u32,
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    /// No attempts left; the job is retained in the failed set.
    Exhausted { attempts_made: u32 },
}

impl FailureDisposition {
    pub fn is_final(&self) -> bool {
        matches!(self, FailureDisposition::Exhausted { .. })
    }

    pub fn attempts_made(&self) -> u32 {
        match self {
            FailureDisposition::Retry { attempts_made, .. } => *attempts_made,
            FailureDisposition::Exhausted { attempts_made } => *attempts_made,
        }
    }
}

/// Jobs per queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub active: u64,
    pub waiting: u64,
    pub failed: u64,
    pub delayed: u64,
    pub completed: u64,
}

/// Durable at-least-once job queue.
///
/// A reserved job stays owned by its consumer until it is completed or
/// failed. A consumer that stops heartbeating loses it to
/// [`JobQueue::reclaim_stalled`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Options attached by [`JobQueue::enqueue`].
    fn default_options(&self) -> JobOptions;

    /// Validate and enqueue a request with explicit options.
    async fn enqueue_with_options(&self, request: TranscodeRequest, options: JobOptions) -> QueueResult<JobId>;

    /// Validate and enqueue a request with the default options.
    async fn enqueue(&self, request: TranscodeRequest) -> QueueResult<JobId> {
        self.enqueue_with_options(request, self.default_options()).await
    }

    /// Take the next waiting job, waiting up to `block` for one to arrive.
    async fn reserve(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Take over deliveries whose owner has been silent for at least `min_idle`.
    async fn reclaim_stalled(&self, consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Refresh ownership of a running delivery.
    async fn heartbeat(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()>;

    /// Mark a delivery's job completed.
    async fn complete(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Record a failed attempt and schedule a retry or retire the job.
    async fn fail(&self, delivery: &Delivery, reason: &str) -> QueueResult<FailureDisposition>;

    /// Move delayed jobs whose backoff has elapsed by `now` back to waiting.
    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Jobs per state.
    async fn counts(&self) -> QueueResult<QueueCounts>;

    /// Look up a retained job record.
    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Most recently failed jobs first.
    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<JobRecord>>;
}
