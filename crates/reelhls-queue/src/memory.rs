//! In-process queue with the same semantics as the Redis backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelhls_models::{JobId, JobOptions, JobRecord, JobState, TranscodeRequest};
use tokio::sync::Notify;

use crate::backend::{Delivery, FailureDisposition, JobQueue, QueueCounts};
use crate::error::{QueueError, QueueResult};

#[derive(Debug)]
struct Pending {
    job_id: JobId,
    consumer: String,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<JobId, JobRecord>,
    waiting: VecDeque<(String, JobId)>,
    pending: HashMap<String, Pending>,
    delayed: Vec<JobId>,
    failed: Vec<JobId>,
    completed: u64,
    next_delivery: u64,
}

impl State {
    fn push_waiting(&mut self, job_id: JobId) {
        self.next_delivery += 1;
        self.waiting.push_back((format!("{}-0", self.next_delivery), job_id));
    }
}

/// [`JobQueue`] held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
    options: JobOptions,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `options` for jobs enqueued without explicit options.
    pub fn with_options(options: JobOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_reserve(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut state = self.lock();

        while let Some((delivery_id, job_id)) = state.waiting.pop_front() {
            let activated = state.records.get_mut(&job_id).and_then(|job| {
                job.activate().ok()?;
                Some(job.clone())
            });
            let Some(job) = activated else {
                continue;
            };

            state.pending.insert(
                delivery_id.clone(),
                Pending {
                    job_id,
                    consumer: consumer.to_string(),
                    last_seen: Instant::now(),
                },
            );
            return Ok(Some(Delivery {
                delivery_id,
                job,
                redelivered: false,
            }));
        }

        Ok(None)
    }

    fn take_pending(state: &mut State, delivery: &Delivery) -> QueueResult<JobRecord> {
        let pending = state
            .pending
            .remove(&delivery.delivery_id)
            .ok_or_else(|| QueueError::LostDelivery(delivery.delivery_id.clone()))?;
        state
            .records
            .get(&pending.job_id)
            .cloned()
            .ok_or_else(|| QueueError::job_not_found(pending.job_id.as_str()))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn default_options(&self) -> JobOptions {
        self.options
    }

    async fn enqueue_with_options(&self, request: TranscodeRequest, options: JobOptions) -> QueueResult<JobId> {
        request.validate()?;

        let record = JobRecord::new(request, options);
        let id = record.id.clone();
        {
            let mut state = self.lock();
            state.records.insert(id.clone(), record);
            state.push_waiting(id.clone());
        }
        self.notify.notify_one();
        Ok(id)
    }

    async fn reserve(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_reserve(consumer)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_reserve(consumer);
            }
        }
    }

    async fn reclaim_stalled(&self, consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock();
        let now = Instant::now();

        let mut stalled: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        stalled.sort();
        stalled.truncate(count);

        let mut deliveries = Vec::new();
        for delivery_id in stalled {
            let Some(pending) = state.pending.get_mut(&delivery_id) else {
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.last_seen = now;
            let job_id = pending.job_id.clone();

            if let Some(job) = state.records.get_mut(&job_id) {
                if job.activate_stalled().is_ok() {
                    deliveries.push(Delivery {
                        delivery_id,
                        job: job.clone(),
                        redelivered: true,
                    });
                }
            }
        }

        Ok(deliveries)
    }

    async fn heartbeat(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()> {
        let mut state = self.lock();
        let pending = state
            .pending
            .get_mut(&delivery.delivery_id)
            .ok_or_else(|| QueueError::LostDelivery(delivery.delivery_id.clone()))?;
        pending.consumer = consumer.to_string();
        pending.last_seen = Instant::now();
        Ok(())
    }

    async fn complete(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.lock();
        let mut job = Self::take_pending(&mut state, delivery)?;
        job.complete()?;

        if job.options.remove_on_complete {
            state.records.remove(&job.id);
        } else {
            state.records.insert(job.id.clone(), job);
        }
        state.completed += 1;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> QueueResult<FailureDisposition> {
        let mut state = self.lock();
        let mut job = Self::take_pending(&mut state, delivery)?;
        let status = job.fail_attempt(reason)?;

        let disposition = match (status, job.next_attempt_at) {
            (JobState::Delayed, Some(next_attempt_at)) => {
                state.delayed.push(job.id.clone());
                FailureDisposition::Retry {
                    attempts_made: job.attempts_made,
                    delay: job.options.backoff.delay_for(job.attempts_made),
                    next_attempt_at,
                }
            }
            _ => {
                if !job.options.remove_on_fail {
                    state.failed.push(job.id.clone());
                }
                FailureDisposition::Exhausted {
                    attempts_made: job.attempts_made,
                }
            }
        };

        if status == JobState::Failed && job.options.remove_on_fail {
            state.records.remove(&job.id);
        } else {
            state.records.insert(job.id.clone(), job);
        }
        Ok(disposition)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let promoted = {
            let mut state = self.lock();
            let delayed = std::mem::take(&mut state.delayed);
            let mut promoted = 0;

            for id in delayed {
                let due = state.records.get(&id).map(|j| j.is_due(now)).unwrap_or(false);
                if !due {
                    if state.records.contains_key(&id) {
                        state.delayed.push(id);
                    }
                    continue;
                }
                let ok = state
                    .records
                    .get_mut(&id)
                    .map(|job| job.promote().is_ok())
                    .unwrap_or(false);
                if ok {
                    state.push_waiting(id);
                    promoted += 1;
                }
            }
            promoted
        };

        for _ in 0..promoted {
            self.notify.notify_one();
        }
        Ok(promoted)
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let state = self.lock();
        Ok(QueueCounts {
            active: state.pending.len() as u64,
            waiting: state.waiting.len() as u64,
            failed: state.failed.len() as u64,
            delayed: state.delayed.len() as u64,
            completed: state.completed,
        })
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.lock().records.get(id).cloned())
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        let state = self.lock();
        Ok(state
            .failed
            .iter()
            .rev()
            .filter_map(|id| state.records.get(id).cloned())
            .take(limit)
            .collect())
    }
}
