//! The conversion pipeline: one job from source blob to published manifest.
//!
//! ## Outcome contract
//!
//! [`ConversionPipeline::run`] never returns an error. Every run ends with the
//! job in a terminal state and with one manifest attempted at
//! `<prefix>manifest.json`:
//!
//! * success: pages uploaded in order, then the success manifest, then the
//!   job is marked `succeeded`. A job is never reported successful before
//!   its manifest exists.
//! * failure: whatever went wrong is folded into `(code, message)` by
//!   [`PipelineError::failure`], a failure manifest is written on a best
//!   effort basis, then the job is marked `failed` with the same pair.
//!
//! Panics inside the pipeline are caught and reported as `UNEXPECTED_ERROR`
//! so a job can never be left `running`.

use crate::config::ServiceConfig;
use crate::error::{ErrorCode, PipelineError, StageError};
use crate::job::Job;
use crate::manifest::{Manifest, PageEntry, MANIFEST_CONTENT_TYPE};
use crate::pipeline::{JobWorkspace, PageExtractor, RenderEngine};
use crate::registry::{JobRegistry, StatusUpdate};
use crate::storage::BlobStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Runs jobs through download → render → extract → upload → manifest.
pub struct ConversionPipeline {
    registry: Arc<JobRegistry>,
    store: Arc<dyn BlobStore>,
    renderer: Arc<dyn RenderEngine>,
    extractor: Arc<dyn PageExtractor>,
    work_dir: PathBuf,
    max_input_size_mb: u64,
    max_input_size_bytes: u64,
}

impl ConversionPipeline {
    pub fn new(
        config: &ServiceConfig,
        registry: Arc<JobRegistry>,
        store: Arc<dyn BlobStore>,
        renderer: Arc<dyn RenderEngine>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        Self {
            registry,
            store,
            renderer,
            extractor,
            work_dir: config.work_dir.clone(),
            max_input_size_mb: config.max_input_size_mb,
            max_input_size_bytes: config.max_input_size_bytes(),
        }
    }

    /// Drive `job` to a terminal state and return the final record.
    ///
    /// Returns `None` only if the job is unknown to the registry.
    pub async fn run(&self, job: &Job) -> Option<Job> {
        let span = info_span!("conversion_job", job_id = %job.id);
        async move {
            let started = Instant::now();
            info!(source = %job.source, destination_bucket = %job.destination.bucket, prefix = job.destination.prefix(), "Starting conversion");

            let outcome = match AssertUnwindSafe(self.execute(job)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(PipelineError::Internal(format!(
                    "pipeline panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            match outcome {
                Ok(page_count) => {
                    info!(
                        page_count,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Conversion succeeded"
                    );
                    self.registry
                        .update_status(&job.id, StatusUpdate::succeeded(page_count))
                        .await
                }
                Err(e) => {
                    let (code, message) = e.failure();
                    error!(
                        error_code = %code,
                        error = %message,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Conversion failed"
                    );
                    self.publish_failure(job, code, &message).await;
                    self.registry
                        .update_status(&job.id, StatusUpdate::failed(code, message))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// The happy path. Returns the number of pages published.
    async fn execute(&self, job: &Job) -> Result<usize, PipelineError> {
        // ── Step 1: Working tree ─────────────────────────────────────────
        let workspace = JobWorkspace::create(&self.work_dir, &job.id).await?;
        let result = self.process(job, &workspace).await;
        workspace.cleanup().await;
        result
    }

    async fn process(&self, job: &Job, workspace: &JobWorkspace) -> Result<usize, PipelineError> {
        // ── Step 2: Download and size check ──────────────────────────────
        let input = workspace.input_file(&job.source.key);
        let size = self
            .store
            .download(&job.source.bucket, &job.source.key, &input)
            .await?;
        if size > self.max_input_size_bytes {
            return Err(StageError::FileTooLarge {
                size_mb: size as f64 / BYTES_PER_MB,
                max_mb: self.max_input_size_mb,
            }
            .into());
        }

        // ── Step 3: Render ───────────────────────────────────────────────
        let rendered = self
            .renderer
            .render(&input, workspace.rendered_dir(), &job.id)
            .await?;

        // ── Step 4: Extract pages ────────────────────────────────────────
        let extracted = self
            .extractor
            .extract(&rendered, workspace.pages_dir())
            .await?;
        if extracted.count != extracted.paths.len() {
            return Err(StageError::SplitFailed {
                detail: format!(
                    "extractor reported {} pages but produced {} files",
                    extracted.count,
                    extracted.paths.len()
                ),
            }
            .into());
        }
        if extracted.paths.is_empty() {
            return Err(StageError::EmptyDocument.into());
        }
        info!(page_count = extracted.paths.len(), "Pages extracted");

        // ── Step 5: Upload pages in order ────────────────────────────────
        let bucket = &job.destination.bucket;
        let mut pages = Vec::with_capacity(extracted.paths.len());
        for (idx, path) in extracted.paths.iter().enumerate() {
            let page = idx + 1;
            let key = job.destination.page_key(page, "pdf");
            self.store.upload(path, bucket, &key).await?;
            pages.push(PageEntry { page, key });
        }

        // ── Step 6: Success manifest ─────────────────────────────────────
        let page_count = pages.len();
        let body = Manifest::succeeded(job, pages).to_json_bytes()?;
        self.store
            .upload_bytes(body, bucket, &job.destination.manifest_key(), MANIFEST_CONTENT_TYPE)
            .await?;

        Ok(page_count)
    }

    /// Best effort: a failing upload here is logged and otherwise ignored.
    async fn publish_failure(&self, job: &Job, code: ErrorCode, message: &str) {
        let manifest_key = job.destination.manifest_key();
        let body = match Manifest::failed(job, code, message).to_json_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Could not serialise failure manifest");
                return;
            }
        };

        if let Err(e) = self
            .store
            .upload_bytes(body, &job.destination.bucket, &manifest_key, MANIFEST_CONTENT_TYPE)
            .await
        {
            error!(
                bucket = %job.destination.bucket,
                key = %manifest_key,
                error = %e,
                "Failed to write failure manifest"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
