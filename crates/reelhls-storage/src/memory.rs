//! In-memory object store used by tests and local runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// A stored blob and the content type it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    put_log: Vec<String>,
    delete_log: Vec<String>,
    fail_suffix: Option<String>,
}

/// [`ObjectStore`] keeping objects in a sorted map.
///
/// Records the order of writes and can be told to reject uploads of keys
/// ending in a given suffix.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future upload whose key ends with `suffix`.
    pub fn fail_uploads_ending_with(&self, suffix: impl Into<String>) {
        self.lock().fail_suffix = Some(suffix.into());
    }

    /// Accept all uploads again.
    pub fn clear_failures(&self) {
        self.lock().fail_suffix = None;
    }

    /// Insert an object directly.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>, content_type: &str) {
        self.lock().objects.insert(
            key.into(),
            StoredObject {
                bytes: bytes.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Snapshot of every object, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, StoredObject> {
        self.lock().objects.clone()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Keys in the order they were written.
    pub fn put_log(&self) -> Vec<String> {
        self.lock().put_log.clone()
    }

    /// Keys in the order they were deleted.
    pub fn delete_log(&self) -> Vec<String> {
        self.lock().delete_log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let rejected = self
            .lock()
            .fail_suffix
            .as_deref()
            .map(|suffix| key.ends_with(suffix))
            .unwrap_or(false);
        if rejected {
            return Err(StorageError::upload_failed(key, "injected failure"));
        }

        let bytes = tokio::fs::read(path).await?;

        let mut inner = self.lock();
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        inner.put_log.push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.objects.remove(key);
        inner.delete_log.push(key.to_string());
        Ok(())
    }
}
