//! The object store seam.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Key/value blob storage addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}
