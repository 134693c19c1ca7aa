//! Durable job queue for transcode jobs.
//!
//! This crate provides:
//! - The `JobQueue` seam (enqueue, reserve, complete/fail, stall reclaim)
//! - A Redis Streams backend with delayed retries and a retained failed set
//! - An in-memory backend for tests

pub mod backend;
pub mod error;
pub mod memory;
pub mod queue;

pub use backend::{Delivery, FailureDisposition, JobQueue, QueueCounts};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobQueue;
pub use queue::{QueueConfig, RedisJobQueue};
