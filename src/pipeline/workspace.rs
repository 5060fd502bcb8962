//! Per-job scratch directories.

use crate::error::PipelineError;
use crate::job::JobId;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name used when the source key has no usable final segment.
const FALLBACK_INPUT_NAME: &str = "input";

/// The working tree of one job: `<work_root>/job-<id>/{input,rendered,pages}`.
///
/// [`JobWorkspace::cleanup`] removes the tree on the async path. Dropping an
/// uncleaned workspace (early return, unwinding) removes it synchronously.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    input: PathBuf,
    rendered: PathBuf,
    pages: PathBuf,
    removed: bool,
}

impl JobWorkspace {
    /// Create a fresh tree, discarding anything left behind by an earlier run
    /// of the same job.
    pub async fn create(work_root: &Path, job_id: &JobId) -> Result<Self, PipelineError> {
        let root = work_root.join(format!("job-{job_id}"));

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => warn!(job_id = %job_id, path = %root.display(), "Removed stale workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::io(&root, e)),
        }

        let workspace = Self {
            input: root.join("input"),
            rendered: root.join("rendered"),
            pages: root.join("pages"),
            root,
            removed: false,
        };
        for dir in [&workspace.input, &workspace.rendered, &workspace.pages] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }

        debug!(job_id = %job_id, path = %workspace.root.display(), "Workspace ready");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn rendered_dir(&self) -> &Path {
        &self.rendered
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages
    }

    /// Local path for the downloaded source, named after the key's last
    /// segment so the rendered file keeps the same stem.
    pub fn input_file(&self, source_key: &str) -> PathBuf {
        let name = source_key
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .unwrap_or(FALLBACK_INPUT_NAME);
        self.input.join(name)
    }

    /// Remove the tree without blocking a runtime worker.
    pub async fn cleanup(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn creates_layout_and_removes_it_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(tmp.path(), &id("j1")).await.unwrap();
        let root = ws.root().to_path_buf();

        assert_eq!(root, tmp.path().join("job-j1"));
        assert!(ws.input_dir().is_dir());
        assert!(ws.rendered_dir().is_dir());
        assert!(ws.pages_dir().is_dir());

        drop(ws);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn cleanup_removes_tree_with_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(tmp.path(), &id("j2")).await.unwrap();
        let root = ws.root().to_path_buf();
        std::fs::write(ws.pages_dir().join("0001.pdf"), b"%PDF").unwrap();

        ws.cleanup().await;
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn stale_content_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = tmp.path().join("job-j1/pages/0001.pdf");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old").unwrap();

        let ws = JobWorkspace::create(tmp.path(), &id("j1")).await.unwrap();
        assert!(!stale.exists());
        assert!(ws.pages_dir().is_dir());
    }

    #[tokio::test]
    async fn input_file_uses_last_key_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(tmp.path(), &id("j1")).await.unwrap();

        assert_eq!(
            ws.input_file("uploads/u1/deck.pptx"),
            ws.input_dir().join("deck.pptx")
        );
        assert_eq!(ws.input_file("uploads/"), ws.input_dir().join("input"));
        assert_eq!(ws.input_file(".."), ws.input_dir().join("input"));
    }
}
