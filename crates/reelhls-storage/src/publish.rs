//! Publication of a local output tree under a destination prefix.
//!
//! The master playlist is the entry point players load, so it is removed
//! before anything else is written and uploaded only after every object it
//! references has landed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use reelhls_models::encoding::MASTER_PLAYLIST_NAME;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Files uploaded concurrently by default.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Content type for a published file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Join a prefix and a relative path into an object key.
///
/// Backslashes become `/` and empty components are dropped, so the key never
/// contains `//` or a leading or trailing slash.
pub fn object_key(prefix: &str, relative: &str) -> String {
    prefix
        .split('/')
        .chain(relative.split(['/', '\\']))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A file found in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Path relative to the tree root, `/`-separated
    pub relative: String,
    pub size: u64,
}

/// Every regular file under `root`, sorted by relative path.
pub async fn collect_files(root: &Path) -> StorageResult<Vec<LocalFile>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_tree(&root))
        .await
        .map_err(|e| StorageError::internal(format!("tree walk panicked: {}", e)))?
}

fn walk_tree(root: &Path) -> StorageResult<Vec<LocalFile>> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| StorageError::internal(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");

        files.push(LocalFile {
            path: entry.path().to_path_buf(),
            relative,
            size: entry.metadata().map_err(std::io::Error::from)?.len(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Publication options.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Files uploaded at once
    pub concurrency: usize,
    /// Whether intermediate `.mp4` renditions are published
    pub include_renditions: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            include_renditions: true,
        }
    }
}

/// What a publication wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Keys written, sorted, master playlist included
    pub keys: Vec<String>,
    pub total_bytes: u64,
}

/// Uploads output trees to an [`ObjectStore`].
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    options: PublishOptions,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_options(store, PublishOptions::default())
    }

    pub fn with_options(store: Arc<dyn ObjectStore>, options: PublishOptions) -> Self {
        Self { store, options }
    }

    /// Publish every file under `root` to `prefix/<relative path>`.
    ///
    /// Stops at the first failed upload. Objects already written stay in
    /// place; the master playlist is not written in that case.
    pub async fn publish(&self, root: &Path, prefix: &str) -> StorageResult<PublishReport> {
        let master_key = object_key(prefix, MASTER_PLAYLIST_NAME);
        self.store.delete_object(&master_key).await?;
        debug!(key = %master_key, "Removed stale master playlist");

        let files = collect_files(root).await?;
        let (masters, rest): (Vec<_>, Vec<_>) = files
            .into_iter()
            .filter(|f| self.options.include_renditions || content_type_for(&f.path) != "video/mp4")
            .partition(|f| f.relative == MASTER_PLAYLIST_NAME);

        let mut report = PublishReport::default();
        for file in rest.iter().chain(masters.iter()) {
            report.keys.push(object_key(prefix, &file.relative));
            report.total_bytes += file.size;
        }
        report.keys.sort();

        let concurrency = self.options.concurrency.max(1);
        stream::iter(rest.iter().map(Ok::<_, StorageError>))
            .try_for_each_concurrent(concurrency, |file| self.upload(prefix, file))
            .await?;

        for master in &masters {
            self.upload(prefix, master).await?;
        }

        info!(
            prefix,
            files = report.keys.len(),
            bytes = report.total_bytes,
            "Published output tree"
        );
        Ok(report)
    }

    async fn upload(&self, prefix: &str, file: &LocalFile) -> StorageResult<()> {
        let key = object_key(prefix, &file.relative);
        self.store
            .put_file(&file.path, &key, content_type_for(&file.path))
            .await
    }
}
