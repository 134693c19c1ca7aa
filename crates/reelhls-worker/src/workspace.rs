//! Per-job scratch workspace.
//!
//! Layout under `{work_dir}/{job_id}-{uuid}/`:
//!
//! ```text
//! input/source
//! output/thumbnail.jpg
//! output/master.m3u8
//! output/<quality>/<base>_<quality>.mp4
//! output/<quality>/segments/playlist.m3u8
//! output/<quality>/segments/segment_NNN.ts
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use reelhls_models::encoding::{MASTER_PLAYLIST_NAME, SEGMENTS_DIR, THUMBNAIL_NAME};
use reelhls_models::JobId;

/// A uniquely named directory owned by one job execution.
///
/// [`ScratchWorkspace::cleanup`] must be awaited on every exit path; if the
/// owning future is dropped first, `Drop` removes the tree synchronously.
#[derive(Debug)]
pub struct ScratchWorkspace {
    root: PathBuf,
    cleaned: bool,
}

impl ScratchWorkspace {
    /// Create a fresh workspace for `job_id` under `work_dir`.
    pub async fn create(work_dir: &Path, job_id: &JobId) -> std::io::Result<Self> {
        let root = work_dir.join(format!("{}-{}", job_id, Uuid::new_v4()));
        let workspace = Self { root, cleaned: false };

        tokio::fs::create_dir_all(workspace.input_dir()).await?;
        tokio::fs::create_dir_all(workspace.output_dir()).await?;

        debug!(path = %workspace.root.display(), "Created scratch workspace");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    /// Where the downloaded source is written.
    pub fn source_path(&self) -> PathBuf {
        self.input_dir().join("source")
    }

    /// Root of the tree that gets published.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.output_dir().join(THUMBNAIL_NAME)
    }

    pub fn master_playlist_path(&self) -> PathBuf {
        self.output_dir().join(MASTER_PLAYLIST_NAME)
    }

    pub fn quality_dir(&self, quality: &str) -> PathBuf {
        self.output_dir().join(quality)
    }

    pub fn segments_dir(&self, quality: &str) -> PathBuf {
        self.quality_dir(quality).join(SEGMENTS_DIR)
    }

    /// Remove the input file, the output tree and the workspace root.
    ///
    /// Already-absent paths are skipped. Errors are logged and swallowed.
    /// Calling it again is a no-op.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }

        remove_quietly(&self.source_path(), false).await;
        remove_quietly(&self.output_dir(), true).await;
        remove_quietly(&self.root, true).await;

        self.cleaned = true;
        debug!(path = %self.root.display(), "Cleaned up scratch workspace");
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.root.display(), "Failed to remove scratch workspace: {}", e);
                }
            }
        }
    }
}

async fn remove_quietly(path: &Path, is_dir: bool) {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Cleanup failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout() {
        let work_dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from_string("job-1");
        let mut ws = ScratchWorkspace::create(work_dir.path(), &job_id).await.unwrap();

        assert!(ws.root().starts_with(work_dir.path()));
        assert!(ws
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("job-1-"));
        assert!(ws.input_dir().is_dir());
        assert!(ws.output_dir().is_dir());
        assert_eq!(ws.source_path(), ws.root().join("input/source"));
        assert_eq!(ws.segments_dir("720p"), ws.root().join("output/720p/segments"));
        assert_eq!(ws.master_playlist_path(), ws.root().join("output/master.m3u8"));

        ws.cleanup().await;
    }

    #[tokio::test]
    async fn test_workspaces_are_unique() {
        let work_dir = tempfile::tempdir().unwrap();
        let job_id = JobId::from_string("job-1");
        let a = ScratchWorkspace::create(work_dir.path(), &job_id).await.unwrap();
        let b = ScratchWorkspace::create(work_dir.path(), &job_id).await.unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything_and_is_idempotent() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut ws = ScratchWorkspace::create(work_dir.path(), &JobId::new()).await.unwrap();

        tokio::fs::write(ws.source_path(), b"source").await.unwrap();
        tokio::fs::create_dir_all(ws.segments_dir("360p")).await.unwrap();
        tokio::fs::write(ws.segments_dir("360p").join("segment_000.ts"), b"ts")
            .await
            .unwrap();

        let root = ws.root().to_path_buf();
        ws.cleanup().await;
        assert!(!root.exists());

        ws.cleanup().await;
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_paths() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut ws = ScratchWorkspace::create(work_dir.path(), &JobId::new()).await.unwrap();

        // Nothing was ever written to input/source.
        tokio::fs::remove_dir_all(ws.output_dir()).await.unwrap();
        let root = ws.root().to_path_buf();
        ws.cleanup().await;
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_uncleaned_workspace() {
        let work_dir = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::create(work_dir.path(), &JobId::new()).await.unwrap();
        let root = ws.root().to_path_buf();

        drop(ws);
        assert!(!root.exists());
    }
}
