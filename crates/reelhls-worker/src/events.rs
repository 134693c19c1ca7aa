//! Job lifecycle observations.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use reelhls_models::{CorrelationId, JobId};

/// Published on the worker's broadcast channel as jobs move through the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    /// A delivery was taken over from a silent consumer.
    Stalled { job_id: JobId },
    /// An attempt started.
    Active { job_id: JobId, attempt: u32 },
    Completed {
        job_id: JobId,
        correlation_id: CorrelationId,
    },
    /// An attempt failed. `terminal` is set once no attempts remain.
    Failed {
        job_id: JobId,
        reason: String,
        attempts_made: u32,
        terminal: bool,
    },
}

impl LifecycleEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            LifecycleEvent::Stalled { job_id }
            | LifecycleEvent::Active { job_id, .. }
            | LifecycleEvent::Completed { job_id, .. }
            | LifecycleEvent::Failed { job_id, .. } => job_id,
        }
    }
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Published and acknowledged.
    Completed { job_id: JobId, objects: usize },
    /// Attempt failed; the queue will redeliver after `delay`.
    Retrying {
        job_id: JobId,
        attempts_made: u32,
        delay: Duration,
        reason: String,
    },
    /// Attempts exhausted; the job is retained as failed.
    Failed {
        job_id: JobId,
        attempts_made: u32,
        reason: String,
    },
    /// The queue could not record the result. The delivery stays pending
    /// and is picked up again once it counts as stalled.
    Abandoned { job_id: JobId, reason: String },
}

impl JobOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Retrying { .. } => "retrying",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Abandoned { .. } => "abandoned",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobOutcome::Completed { job_id, .. }
            | JobOutcome::Retrying { job_id, .. }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::Abandoned { job_id, .. } => job_id,
        }
    }
}

/// Fan-out of [`LifecycleEvent`]s. Slow subscribers miss events rather than
/// holding up jobs.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job_id = JobId::from_string("job-1");

        bus.emit(LifecycleEvent::Active {
            job_id: job_id.clone(),
            attempt: 1,
        });
        bus.emit(LifecycleEvent::Completed {
            job_id: job_id.clone(),
            correlation_id: CorrelationId::from(42u64),
        });

        assert!(matches!(rx.recv().await.unwrap(), LifecycleEvent::Active { attempt: 1, .. }));
        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.job_id(), &job_id);
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new(1).emit(LifecycleEvent::Stalled {
            job_id: JobId::new(),
        });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(LifecycleEvent::Failed {
            job_id: JobId::from_string("job-1"),
            reason: "boom".to_string(),
            attempts_made: 3,
            terminal: true,
        })
        .unwrap();

        assert_eq!(json["event"], "failed");
        assert_eq!(json["attemptsMade"], 3);
        assert_eq!(json["terminal"], true);
    }
}
