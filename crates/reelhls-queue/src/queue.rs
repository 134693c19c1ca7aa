//! Job queue using Redis Streams.
//!
//! Layout under the configured prefix:
//! - `{prefix}:jobs`: stream of waiting and delivered job ids, read through a consumer group
//! - `{prefix}:job:{id}`: JSON job record
//! - `{prefix}:delayed`: sorted set of job ids by next attempt time (ms)
//! - `{prefix}:failed`: sorted set of retained failed job ids by failure time (ms)
//! - `{prefix}:completed`: completed job counter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadReply};
use redis::{AsyncCommands, Script};
use reelhls_models::{Backoff, JobId, JobOptions, JobRecord, JobState, TranscodeRequest};
use tracing::{debug, info, warn};

use crate::backend::{Delivery, FailureDisposition, JobQueue, QueueCounts};
use crate::error::{QueueError, QueueResult};

/// Stream entry field carrying the job id.
const JOB_ID_FIELD: &str = "job_id";

/// Delayed jobs promoted per maintenance pass.
const PROMOTE_BATCH: isize = 100;

/// Moves one id from the delayed set back onto the stream.
///
/// KEYS: delayed set, job record, stream.
/// ARGV: job id, promoted record, id field, now in ms.
/// Returns 0 when the id is no longer due, e.g. another worker promoted it.
const PROMOTE_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score or tonumber(score) > tonumber(ARGV[4]) then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('XADD', KEYS[3], '*', ARGV[3], ARGV[1])
return 1
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix, also the queue name
    pub prefix: String,
    /// Total attempts per job
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "reelhls:transcode".to_string(),
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_attempts),
            backoff_base_ms: std::env::var("QUEUE_BACKOFF_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backoff_base_ms),
        }
    }

    /// Options attached to newly enqueued jobs.
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.max_attempts,
            backoff: Backoff::exponential(self.backoff_base_ms),
            ..JobOptions::default()
        }
    }

    fn stream_key(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    fn group_name(&self) -> String {
        format!("{}:workers", self.prefix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    fn completed_key(&self) -> String {
        format!("{}:completed", self.prefix)
    }
}

/// [`JobQueue`] backed by a Redis stream and consumer group.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let group = self.config.group_name();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.config.stream_key())
            .arg(&group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", group),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Check connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &str) -> QueueResult<Option<JobRecord>> {
        let json: Option<String> = conn.get(self.config.job_key(id)).await?;
        json.map(|j| serde_json::from_str(&j).map_err(QueueError::from))
            .transpose()
    }

    async fn drop_entry(&self, conn: &mut MultiplexedConnection, delivery_id: &str) -> QueueResult<()> {
        let stream = self.config.stream_key();
        redis::pipe()
            .atomic()
            .xack(&stream, self.config.group_name(), &[delivery_id])
            .ignore()
            .xdel(&stream, &[delivery_id])
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Turn a stream entry into an activated delivery.
    ///
    /// Entries whose record is gone or already terminal are acknowledged and
    /// skipped.
    async fn activate_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
        redelivered: bool,
    ) -> QueueResult<Option<Delivery>> {
        let delivery_id = entry.id.clone();

        let Some(job_id) = entry.get::<String>(JOB_ID_FIELD) else {
            warn!("Stream entry {} has no job id, dropping it", delivery_id);
            self.drop_entry(conn, &delivery_id).await?;
            return Ok(None);
        };

        let Some(mut job) = self.load(conn, &job_id).await? else {
            warn!(job_id = %job_id, "Job record missing, dropping entry {}", delivery_id);
            self.drop_entry(conn, &delivery_id).await?;
            return Ok(None);
        };

        let activated = if redelivered {
            job.activate_stalled()
        } else {
            job.activate()
        };
        if let Err(e) = activated {
            warn!(job_id = %job_id, "Skipping entry {}: {}", delivery_id, e);
            self.drop_entry(conn, &delivery_id).await?;
            return Ok(None);
        }

        let json = serde_json::to_string(&job)?;
        conn.set::<_, _, ()>(self.config.job_key(&job_id), json).await?;

        Ok(Some(Delivery {
            delivery_id,
            job,
            redelivered,
        }))
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn default_options(&self) -> JobOptions {
        self.config.job_options()
    }

    async fn enqueue_with_options(&self, request: TranscodeRequest, options: JobOptions) -> QueueResult<JobId> {
        request.validate()?;

        let record = JobRecord::new(request, options);
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn().await?;

        let (message_id,): (String,) = redis::pipe()
            .atomic()
            .set(self.config.job_key(record.id.as_str()), &payload)
            .ignore()
            .xadd(self.config.stream_key(), "*", &[(JOB_ID_FIELD, record.id.as_str())])
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = %record.id,
            correlation_id = %record.request.correlation_id,
            "Enqueued job with message ID {}",
            message_id
        );

        Ok(record.id)
    }

    async fn reserve(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        // Blocking reads get their own connection.
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(self.config.group_name())
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(self.config.stream_key())
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let delivery = self.activate_entry(&mut conn, &entry, false).await?;
        if let Some(d) = &delivery {
            debug!(job_id = %d.job.id, "Reserved job as {}", d.delivery_id);
        }
        Ok(delivery)
    }

    async fn reclaim_stalled(&self, consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let stream = self.config.stream_key();
        let group = self.config.group_name();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks idle time, so a delivery that heartbeated meanwhile stays put.
        let mut claim = redis::cmd("XCLAIM");
        claim.arg(&stream).arg(&group).arg(consumer).arg(min_idle_ms);
        for p in &pending.ids {
            claim.arg(&p.id);
        }
        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;

        let mut deliveries = Vec::new();
        for entry in &claimed.ids {
            if let Some(delivery) = self.activate_entry(&mut conn, entry, true).await? {
                info!(job_id = %delivery.job.id, "Reclaimed stalled job {}", delivery.delivery_id);
                deliveries.push(delivery);
            }
        }

        Ok(deliveries)
    }

    async fn heartbeat(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(self.config.stream_key())
            .arg(self.config.group_name())
            .arg(consumer)
            .arg(0)
            .arg(&delivery.delivery_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if claimed.is_empty() {
            return Err(QueueError::LostDelivery(delivery.delivery_id.clone()));
        }
        Ok(())
    }

    async fn complete(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let id = delivery.job.id.as_str();

        let mut job = self
            .load(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(id))?;
        job.complete()?;

        let stream = self.config.stream_key();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if job.options.remove_on_complete {
            pipe.del(self.config.job_key(id)).ignore();
        } else {
            pipe.set(self.config.job_key(id), serde_json::to_string(&job)?).ignore();
        }
        pipe.incr(self.config.completed_key(), 1)
            .ignore()
            .xack(&stream, self.config.group_name(), &[&delivery.delivery_id])
            .ignore()
            .xdel(&stream, &[&delivery.delivery_id])
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        debug!(job_id = %id, "Completed job");
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> QueueResult<FailureDisposition> {
        let mut conn = self.conn().await?;
        let id = delivery.job.id.as_str();

        let mut job = self
            .load(&mut conn, id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(id))?;
        let state = job.fail_attempt(reason)?;

        let stream = self.config.stream_key();
        let mut pipe = redis::pipe();
        pipe.atomic();

        let disposition = match (state, job.next_attempt_at) {
            (JobState::Delayed, Some(next_attempt_at)) => {
                pipe.set(self.config.job_key(id), serde_json::to_string(&job)?)
                    .ignore()
                    .zadd(self.config.delayed_key(), id, millis(next_attempt_at))
                    .ignore();
                FailureDisposition::Retry {
                    attempts_made: job.attempts_made,
                    delay: job.options.backoff.delay_for(job.attempts_made),
                    next_attempt_at,
                }
            }
            _ => {
                if job.options.remove_on_fail {
                    pipe.del(self.config.job_key(id)).ignore();
                } else {
                    let finished = job.finished_at.unwrap_or(job.updated_at);
                    pipe.set(self.config.job_key(id), serde_json::to_string(&job)?)
                        .ignore()
                        .zadd(self.config.failed_key(), id, millis(finished))
                        .ignore();
                }
                FailureDisposition::Exhausted {
                    attempts_made: job.attempts_made,
                }
            }
        };

        pipe.xack(&stream, self.config.group_name(), &[&delivery.delivery_id])
            .ignore()
            .xdel(&stream, &[&delivery.delivery_id])
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        debug!(job_id = %id, ?disposition, "Recorded failed attempt");
        Ok(disposition)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let delayed_key = self.config.delayed_key();

        let due: Vec<String> = conn
            .zrangebyscore_limit(&delayed_key, "-inf", millis(now), 0, PROMOTE_BATCH)
            .await?;

        let script = Script::new(PROMOTE_SCRIPT);
        let mut promoted = 0;
        for id in due {
            let Some(mut job) = self.load(&mut conn, &id).await? else {
                warn!(job_id = %id, "Delayed job has no record, dropping it");
                conn.zrem::<_, _, ()>(&delayed_key, &id).await?;
                continue;
            };
            if let Err(e) = job.promote() {
                warn!(job_id = %id, "Not promoting delayed job: {}", e);
                conn.zrem::<_, _, ()>(&delayed_key, &id).await?;
                continue;
            }

            // The id leaves the delayed set only together with its stream entry.
            let moved: i64 = script
                .key(&delayed_key)
                .key(self.config.job_key(&id))
                .key(self.config.stream_key())
                .arg(&id)
                .arg(serde_json::to_string(&job)?)
                .arg(JOB_ID_FIELD)
                .arg(millis(now))
                .invoke_async(&mut conn)
                .await?;
            if moved == 0 {
                continue;
            }

            debug!(job_id = %id, "Promoted delayed job");
            promoted += 1;
        }

        Ok(promoted)
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let mut conn = self.conn().await?;

        let stream_len: u64 = conn.xlen(self.config.stream_key()).await?;
        let pending: StreamPendingReply = conn
            .xpending(self.config.stream_key(), self.config.group_name())
            .await?;
        let delayed: u64 = conn.zcard(self.config.delayed_key()).await?;
        let failed: u64 = conn.zcard(self.config.failed_key()).await?;
        let completed: Option<u64> = conn.get(self.config.completed_key()).await?;

        let active = pending.count() as u64;
        Ok(QueueCounts {
            active,
            waiting: stream_len.saturating_sub(active),
            failed,
            delayed,
            completed: completed.unwrap_or(0),
        })
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id.as_str()).await
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrevrange(self.config.failed_key(), 0, limit as isize - 1)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&mut conn, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_prefix() {
        let config = QueueConfig {
            prefix: "reelhls:test".to_string(),
            ..Default::default()
        };
        assert_eq!(config.stream_key(), "reelhls:test:jobs");
        assert_eq!(config.group_name(), "reelhls:test:workers");
        assert_eq!(config.job_key("abc"), "reelhls:test:job:abc");
        assert_eq!(config.delayed_key(), "reelhls:test:delayed");
        assert_eq!(config.failed_key(), "reelhls:test:failed");
        assert_eq!(config.completed_key(), "reelhls:test:completed");
    }

    #[test]
    fn test_job_options_from_config() {
        let config = QueueConfig {
            max_attempts: 5,
            backoff_base_ms: 250,
            ..Default::default()
        };
        let options = config.job_options();
        assert_eq!(options.attempts, 5);
        assert_eq!(options.backoff.delay_ms, 250);
        assert!(options.remove_on_complete);
        assert!(!options.remove_on_fail);
    }
}
