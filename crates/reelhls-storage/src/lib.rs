//! Object storage for published HLS packages.
//!
//! This crate provides:
//! - The `ObjectStore` seam and an S3-compatible client (multipart for large files)
//! - An in-memory store for tests
//! - Publication of an output tree under a destination prefix

pub mod client;
pub mod error;
pub mod memory;
pub mod publish;
pub mod store;

pub use client::{S3Config, S3ObjectStore, MULTIPART_CONCURRENCY, MULTIPART_PART_SIZE};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryObjectStore, StoredObject};
pub use publish::{content_type_for, object_key, PublishOptions, PublishReport, Publisher};
pub use store::ObjectStore;
