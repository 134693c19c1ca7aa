//! Worker coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reelhls_media::MediaToolkit;
use reelhls_models::StatusUpdate;
use reelhls_queue::{Delivery, FailureDisposition, JobQueue, QueueCounts};
use reelhls_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::events::{EventBus, JobOutcome, LifecycleEvent};
use crate::fetch::SourceFetcher;
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{PackageReport, Pipeline};
use crate::retry::FailureTracker;
use crate::status::StatusSink;

/// Collaborators a [`Worker`] is built from.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ObjectStore>,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub status: Arc<dyn StatusSink>,
}

/// Read-only snapshot for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub counts: QueueCounts,
}

/// Consumes jobs from the queue and runs the packaging pipeline on each.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    pipeline: Pipeline,
    status: Arc<dyn StatusSink>,
    events: EventBus,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    consumer_name: String,
}

impl Worker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Self {
        let concurrency = config.concurrency.max(1);
        let pipeline = Pipeline::new(&config, deps.toolkit, deps.fetcher, deps.store);
        let (shutdown, _) = watch::channel(false);

        Self {
            config: WorkerConfig {
                concurrency,
                ..config
            },
            queue: deps.queue,
            pipeline,
            status: deps.status,
            events: EventBus::default(),
            job_semaphore: Arc::new(Semaphore::new(concurrency)),
            shutdown,
            running: AtomicBool::new(false),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Name this worker uses as a queue consumer.
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> WorkerResult<WorkerStatus> {
        Ok(WorkerStatus {
            running: self.is_running(),
            counts: self.queue.counts().await?,
        })
    }

    /// Signal shutdown. In-flight jobs are allowed to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Consume jobs until [`Worker::shutdown`] is called.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::config_error("worker is already running"));
        }

        info!(
            "Starting worker '{}' with {} concurrent jobs",
            self.consumer_name, self.config.concurrency
        );

        let maintenance = tokio::spawn(Arc::clone(&self).maintenance_loop());
        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_interval = self.config.claim_interval.max(Duration::from_millis(10));
        let mut next_claim = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping worker");
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Stalled jobs are claimed with the slot this loop holds, so a
            // blocking reserve never starves them.
            if Instant::now() >= next_claim {
                next_claim = Instant::now() + claim_interval;
                let mut permits = vec![permit];
                permits.extend(self.free_permits());
                if let Err(e) = self.reclaim_with_permits(permits).await {
                    warn!("Failed to reclaim stalled jobs: {}", e);
                }
                continue;
            }

            match self.queue.reserve(&self.consumer_name, self.config.reserve_block).await {
                Ok(Some(delivery)) => {
                    self.spawn_job(delivery, permit);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error reserving job: {}", e);
                    drop(permit);
                    // Back off on error
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        maintenance.abort();

        info!("Waiting for in-flight jobs to complete...");
        let all_permits = self.config.concurrency as u32;
        if tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(all_permits),
        )
        .await
        .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be redelivered as stalled",
                self.config.shutdown_timeout
            );
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Worker stopped");
        Ok(())
    }

    /// Move delayed jobs whose backoff has elapsed back to waiting.
    pub async fn promote_delayed(&self) -> WorkerResult<usize> {
        let promoted = self.queue.promote_delayed(Utc::now()).await?;
        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Take over stalled deliveries and start executing them.
    ///
    /// Claims at most as many jobs as there are free slots.
    pub async fn reclaim_stalled(self: &Arc<Self>) -> WorkerResult<Vec<JoinHandle<JobOutcome>>> {
        let permits = self.free_permits();
        self.reclaim_with_permits(permits).await
    }

    fn free_permits(&self) -> Vec<OwnedSemaphorePermit> {
        std::iter::from_fn(|| Arc::clone(&self.job_semaphore).try_acquire_owned().ok()).collect()
    }

    /// Claim up to one stalled delivery per permit. Unused permits are released.
    async fn reclaim_with_permits(
        self: &Arc<Self>,
        mut permits: Vec<OwnedSemaphorePermit>,
    ) -> WorkerResult<Vec<JoinHandle<JobOutcome>>> {
        if permits.is_empty() {
            return Ok(Vec::new());
        }

        let deliveries = self
            .queue
            .reclaim_stalled(&self.consumer_name, self.config.stall_timeout, permits.len())
            .await?;
        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        info!("Reclaimed {} stalled jobs", deliveries.len());
        metrics::record_reclaimed(deliveries.len());
        permits.truncate(deliveries.len());

        let mut handles = Vec::with_capacity(deliveries.len());
        for (delivery, permit) in deliveries.into_iter().zip(permits) {
            warn!(
                job_id = %delivery.job.id,
                stalled_count = delivery.job.stalled_count,
                "Job stalled, taking it over"
            );
            self.events.emit(LifecycleEvent::Stalled {
                job_id: delivery.job.id.clone(),
            });
            handles.push(self.spawn_job(delivery, permit));
        }
        Ok(handles)
    }

    fn spawn_job(self: &Arc<Self>, delivery: Delivery, permit: OwnedSemaphorePermit) -> JoinHandle<JobOutcome> {
        let worker = Arc::clone(self);
        metrics::record_in_flight(self.in_flight());

        tokio::spawn(async move {
            let outcome = worker.process_delivery(delivery).await;
            drop(permit);
            metrics::record_in_flight(worker.in_flight());
            outcome
        })
    }

    fn in_flight(&self) -> usize {
        self.config.concurrency - self.job_semaphore.available_permits()
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut promote = tokio::time::interval(self.config.promote_interval.max(Duration::from_millis(10)));
        promote.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = promote.tick() => {
                    if let Err(e) = self.promote_delayed().await {
                        warn!("Failed to promote delayed jobs: {}", e);
                    }
                }
            }
        }
    }

    /// Run one delivery to a terminal result for this attempt.
    ///
    /// Records the outcome with the queue, reports terminal outcomes to the
    /// status sink and publishes lifecycle events.
    pub async fn process_delivery(&self, delivery: Delivery) -> JobOutcome {
        let logger = JobLogger::new(&delivery.job);
        logger.log_start(&format!(
            "{} -> {}",
            delivery.job.request.source_url, delivery.job.request.destination_prefix
        ));
        if delivery.redelivered {
            logger.log_warning("redelivered after a stalled attempt");
        }
        self.events.emit(LifecycleEvent::Active {
            job_id: delivery.job.id.clone(),
            attempt: logger.attempt(),
        });

        let started = Instant::now();
        let outcome = if delivery.job.stall_limit_exceeded() {
            let reason = format!(
                "job stalled {} times, limit is {}",
                delivery.job.stalled_count, delivery.job.options.max_stalled_count
            );
            self.finish_failure(&delivery, &logger, "stall", reason).await
        } else {
            let result = {
                let _heartbeat = self.start_heartbeat(&delivery);
                self.pipeline.run(&delivery.job).await
            };
            match result {
                Ok(report) => self.finish_success(&delivery, &logger, report).await,
                Err(e) => self.finish_failure(&delivery, &logger, e.stage(), e.to_string()).await,
            }
        };

        metrics::record_job(outcome.label(), started.elapsed().as_secs_f64());
        outcome
    }

    async fn finish_success(&self, delivery: &Delivery, logger: &JobLogger, report: PackageReport) -> JobOutcome {
        let job = &delivery.job;

        if let Err(e) = self.queue.complete(delivery).await {
            logger.log_error(&format!("failed to mark job completed: {}", e));
            return JobOutcome::Abandoned {
                job_id: job.id.clone(),
                reason: e.to_string(),
            };
        }

        logger.log_completion(&format!(
            "published {} objects ({} bytes) under {}",
            report.published.keys.len(),
            report.published.total_bytes,
            job.request.destination_prefix
        ));

        self.status
            .report(&StatusUpdate::done(job.request.correlation_id.clone()))
            .await;
        self.events.emit(LifecycleEvent::Completed {
            job_id: job.id.clone(),
            correlation_id: job.request.correlation_id.clone(),
        });

        JobOutcome::Completed {
            job_id: job.id.clone(),
            objects: report.published.keys.len(),
        }
    }

    async fn finish_failure(&self, delivery: &Delivery, logger: &JobLogger, stage: &str, reason: String) -> JobOutcome {
        let job = &delivery.job;
        logger.log_error(&format!("{} stage failed: {}", stage, reason));

        let disposition = match self.queue.fail(delivery, &reason).await {
            Ok(disposition) => disposition,
            Err(e) => {
                logger.log_error(&format!("failed to record failed attempt: {}", e));
                return JobOutcome::Abandoned {
                    job_id: job.id.clone(),
                    reason: e.to_string(),
                };
            }
        };

        self.events.emit(LifecycleEvent::Failed {
            job_id: job.id.clone(),
            reason: reason.clone(),
            attempts_made: disposition.attempts_made(),
            terminal: disposition.is_final(),
        });

        match disposition {
            FailureDisposition::Retry {
                attempts_made,
                delay,
                ..
            } => {
                info!(
                    job_id = %job.id,
                    "Job will be retried in {:?} (attempt {}/{})",
                    delay,
                    attempts_made + 1,
                    job.max_attempts()
                );
                JobOutcome::Retrying {
                    job_id: job.id.clone(),
                    attempts_made,
                    delay,
                    reason,
                }
            }
            FailureDisposition::Exhausted { attempts_made } => {
                warn!(
                    job_id = %job.id,
                    "Job failed after {} attempts, keeping it in the failed set", attempts_made
                );
                self.status
                    .report(&StatusUpdate::failed(job.request.correlation_id.clone(), &reason))
                    .await;
                JobOutcome::Failed {
                    job_id: job.id.clone(),
                    attempts_made,
                    reason,
                }
            }
        }
    }

    fn start_heartbeat(&self, delivery: &Delivery) -> HeartbeatGuard {
        let queue = Arc::clone(&self.queue);
        let delivery = delivery.clone();
        let consumer = self.consumer_name.clone();
        let period = self.config.heartbeat_interval.max(Duration::from_millis(10));

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the reservation is fresh.
            ticker.tick().await;

            let mut failures = FailureTracker::new(3);
            loop {
                ticker.tick().await;
                match queue.heartbeat(&delivery, &consumer).await {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(job_id = %delivery.job.id, "Heartbeat failed: {}", e);
                        }
                    }
                }
            }
        }))
    }
}

/// Stops the heartbeat when the attempt ends, however it ends.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, FakeFetcher, FakeToolkit, RecordingStatusSink};
    use reelhls_models::CallbackStatus;
    use reelhls_queue::MemoryJobQueue;
    use reelhls_storage::MemoryObjectStore;

    struct Harness {
        work_dir: tempfile::TempDir,
        queue: Arc<MemoryJobQueue>,
        store: Arc<MemoryObjectStore>,
        toolkit: Arc<FakeToolkit>,
        status: Arc<RecordingStatusSink>,
        worker: Arc<Worker>,
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn harness_with(tweak: impl FnOnce(&mut WorkerConfig)) -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            reserve_block: Duration::from_millis(50),
            promote_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        };
        tweak(&mut config);

        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(MemoryObjectStore::new());
        let toolkit = Arc::new(FakeToolkit::default());
        let status = Arc::new(RecordingStatusSink::default());
        let worker = Arc::new(Worker::new(
            config,
            WorkerDeps {
                queue: queue.clone(),
                store: store.clone(),
                toolkit: toolkit.clone(),
                fetcher: Arc::new(FakeFetcher::default()),
                status: status.clone(),
            },
        ));

        Harness {
            work_dir,
            queue,
            store,
            toolkit,
            status,
            worker,
        }
    }

    impl Harness {
        async fn reserve(&self) -> Delivery {
            self.queue
                .reserve("test", Duration::from_millis(50))
                .await
                .unwrap()
                .expect("a waiting job")
        }

        fn work_dir_is_empty(&self) -> bool {
            std::fs::read_dir(self.work_dir.path()).unwrap().next().is_none()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_job_completes_and_publishes_package() {
        let h = harness();
        let mut events = h.worker.subscribe();
        let job_id = h.queue.enqueue(request()).await.unwrap();

        let outcome = h.worker.process_delivery(h.reserve().await).await;
        assert_eq!(outcome.label(), "completed");
        assert_eq!(outcome.job_id(), &job_id);

        let master = String::from_utf8(h.store.get("out/42/master.m3u8").unwrap().bytes).unwrap();
        assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 4);
        assert!(h.store.get("out/42/thumbnail.jpg").is_some());

        let updates = h.status.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallbackStatus::Done);
        assert_eq!(updates[0].correlation_id.as_str(), "42");

        let counts = h.queue.counts().await.unwrap();
        assert_eq!((counts.active, counts.waiting, counts.completed), (0, 0, 1));
        assert!(h.work_dir_is_empty());

        let events = drain(&mut events);
        assert!(matches!(events[0], LifecycleEvent::Active { attempt: 1, .. }));
        assert!(matches!(events[1], LifecycleEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn test_encode_failure_retries_then_fails() {
        let h = harness();
        h.toolkit.fail_transcode("720p");
        let mut events = h.worker.subscribe();
        let job_id = h.queue.enqueue(request()).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(h.worker.process_delivery(h.reserve().await).await);
            // Skip the backoff wait.
            h.queue
                .promote_delayed(Utc::now() + chrono::Duration::minutes(1))
                .await
                .unwrap();
        }

        assert!(matches!(
            &outcomes[0],
            JobOutcome::Retrying { attempts_made: 1, delay, .. } if *delay == Duration::from_millis(1000)
        ));
        assert!(matches!(
            &outcomes[1],
            JobOutcome::Retrying { attempts_made: 2, delay, .. } if *delay == Duration::from_millis(2000)
        ));
        assert!(matches!(&outcomes[2], JobOutcome::Failed { attempts_made: 3, .. }));

        // Nothing was published under the prefix.
        assert!(h.store.keys().iter().all(|k| !k.starts_with("out/42/")));
        assert!(h.store.put_log().is_empty());

        // One callback, sent after the final attempt.
        let updates = h.status.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallbackStatus::Failed);
        assert!(updates[0].error.as_deref().unwrap().contains("720p"));

        // The failed job is retained with its reason and attempt count.
        let failed = h.queue.failed_jobs(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, job_id);
        assert_eq!(failed[0].attempts_made, 3);
        assert!(failed[0].failed_reason.as_deref().unwrap().contains("720p"));
        assert_eq!(h.queue.counts().await.unwrap().failed, 1);

        let terminal: Vec<bool> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::Failed { terminal, .. } => Some(terminal),
                _ => None,
            })
            .collect();
        assert_eq!(terminal, [false, false, true]);
        assert!(h.work_dir_is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_after_crash_matches_clean_run() {
        let baseline = harness();
        baseline.queue.enqueue(request()).await.unwrap();
        let outcome = baseline.worker.process_delivery(baseline.reserve().await).await;
        assert_eq!(outcome.label(), "completed");

        let h = harness_with(|config| config.stall_timeout = Duration::ZERO);
        let mut events = h.worker.subscribe();
        h.queue.enqueue(request()).await.unwrap();
        let crashed = h.reserve().await;

        // The first execution dies halfway through the upload and never
        // reports back to the queue.
        h.store.fail_uploads_ending_with("segment_001.ts");
        h.worker.pipeline.run(&crashed.job).await.unwrap_err();
        h.store.clear_failures();

        let handles = h.worker.reclaim_stalled().await.unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap().label(), "completed");
        }

        assert_eq!(h.store.snapshot(), baseline.store.snapshot());
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, LifecycleEvent::Stalled { job_id } if *job_id == crashed.job.id)));
        assert!(h.work_dir_is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_takes_over_stalled_job() {
        let h = harness_with(|config| {
            config.concurrency = 1;
            config.stall_timeout = Duration::from_millis(100);
            config.claim_interval = Duration::from_millis(50);
        });
        let mut events = h.worker.subscribe();
        let job_id = h.queue.enqueue(request()).await.unwrap();

        // Reserved by a worker that dies without reporting back.
        h.queue
            .reserve("dead", Duration::from_millis(50))
            .await
            .unwrap()
            .expect("a waiting job");

        let runner = tokio::spawn(Arc::clone(&h.worker).run());
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                let done = matches!(event, LifecycleEvent::Completed { .. });
                seen.push(event);
                if done {
                    return;
                }
            }
        })
        .await
        .expect("stalled job completed by the run loop");

        assert!(matches!(&seen[0], LifecycleEvent::Stalled { job_id: id } if *id == job_id));
        let counts = h.queue.counts().await.unwrap();
        assert_eq!((counts.active, counts.completed), (0, 1));
        assert!(h.store.get("out/42/master.m3u8").is_some());

        h.worker.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_job_stalled_past_limit_is_failed_without_running() {
        let h = harness_with(|config| config.stall_timeout = Duration::ZERO);
        let job_id = h.queue.enqueue(request()).await.unwrap();
        h.queue
            .reserve("dead", Duration::from_millis(50))
            .await
            .unwrap()
            .expect("a waiting job");
        // A first rescuer took it over and died as well.
        h.queue.reclaim_stalled("also-dead", Duration::ZERO, 1).await.unwrap();

        let handles = h.worker.reclaim_stalled().await.unwrap();
        assert_eq!(handles.len(), 1);
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempts_made: 1, .. }));

        assert!(h.toolkit.calls().is_empty());
        assert!(h.store.put_log().is_empty());

        let updates = h.status.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallbackStatus::Failed);
        assert!(updates[0].error.as_deref().unwrap().contains("stalled"));

        let failed = h.queue.failed_jobs(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, job_id);
        assert_eq!(failed[0].stalled_count, 2);
        assert_eq!(h.queue.counts().await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_run_consumes_until_shutdown() {
        let h = harness();
        let mut events = h.worker.subscribe();
        let runner = tokio::spawn(Arc::clone(&h.worker).run());

        h.queue.enqueue(request()).await.unwrap();
        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let LifecycleEvent::Completed { job_id, .. } = events.recv().await.unwrap() {
                    return job_id;
                }
            }
        })
        .await
        .expect("job completed");

        let status = h.worker.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.counts.completed, 1);

        h.worker.shutdown();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("worker stopped")
            .unwrap()
            .unwrap();

        assert!(!h.worker.is_running());
        assert!(h.queue.get(&completed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_promotes_delayed_retries() {
        let h = harness();
        h.toolkit.fail_transcode("360p");
        let mut events = h.worker.subscribe();

        let options = reelhls_models::JobOptions {
            attempts: 2,
            backoff: reelhls_models::Backoff::exponential(10),
            ..Default::default()
        };
        h.queue.enqueue_with_options(request(), options).await.unwrap();
        let runner = tokio::spawn(Arc::clone(&h.worker).run());

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let LifecycleEvent::Failed { terminal: true, attempts_made, .. } = events.recv().await.unwrap() {
                    assert_eq!(attempts_made, 2);
                    return;
                }
            }
        })
        .await
        .expect("job retried and failed");

        h.worker.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(h.status.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let h = harness();
        let runner = tokio::spawn(Arc::clone(&h.worker).run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = Arc::clone(&h.worker).run().await.unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));

        h.worker.shutdown();
        runner.await.unwrap().unwrap();
    }
}
