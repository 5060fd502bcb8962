//! In-memory job registry.
//!
//! The registry is the single owner of every [`Job`] record. All reads and
//! writes go through one `tokio::sync::Mutex` around the whole map, so the
//! registry is the only shared mutable state between concurrently running
//! pipelines. Callers always get cloned snapshots back.

use crate::error::ErrorCode;
use crate::job::{BlobRef, Destination, Job, JobFailure, JobId, JobStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of [`JobRegistry::create_job`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// A new record was stored in `queued`.
    Created(Job),
    /// The identifier was already known; the stored record is returned
    /// untouched.
    Existing(Job),
}

impl Admission {
    pub fn job(&self) -> &Job {
        match self {
            Admission::Created(job) | Admission::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Admission::Created(job) | Admission::Existing(job) => job,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Admission::Created(_))
    }
}

/// Fields applied by [`JobRegistry::update_status`].
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub failure: Option<(ErrorCode, String)>,
    pub page_count: Option<usize>,
}

impl StatusUpdate {
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            failure: None,
            page_count: None,
        }
    }

    pub fn succeeded(page_count: usize) -> Self {
        Self {
            status: JobStatus::Succeeded,
            failure: None,
            page_count: Some(page_count),
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            failure: Some((code, message.into())),
            page_count: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new `queued` job, or return the existing record for `id`.
    pub async fn create_job(
        &self,
        id: JobId,
        owner: &str,
        source: BlobRef,
        destination: Destination,
    ) -> Admission {
        let mut jobs = self.jobs.lock().await;

        if let Some(existing) = jobs.get(&id) {
            warn!(job_id = %id, status = %existing.status, "Job already exists");
            return Admission::Existing(existing.clone());
        }

        let job = Job::new(id.clone(), owner, source, destination);
        info!(
            job_id = %id,
            user_id = %owner,
            source = %job.source,
            status = %job.status,
            "Job created"
        );
        jobs.insert(id, job.clone());
        Admission::Created(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Apply a status transition and its metadata.
    ///
    /// Returns `None` for an unknown job. Jobs already in a terminal state
    /// are never modified; the update is dropped with a warning and the
    /// stored record is returned as-is.
    pub async fn update_status(&self, id: &JobId, update: StatusUpdate) -> Option<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id)?;

        let old_status = job.status;
        if old_status.is_terminal() {
            warn!(
                job_id = %id,
                old_status = %old_status,
                rejected_status = %update.status,
                "Ignoring status update for finished job"
            );
            return Some(job.clone());
        }

        job.status = update.status;
        match update.status {
            JobStatus::Running => job.started_at = Some(Utc::now()),
            JobStatus::Succeeded | JobStatus::Failed => job.completed_at = Some(Utc::now()),
            JobStatus::Queued => {}
        }
        if let Some((code, message)) = update.failure {
            job.failure = Some(JobFailure { code, message });
        }
        if let Some(count) = update.page_count {
            job.page_count = Some(count);
        }

        info!(
            job_id = %id,
            old_status = %old_status,
            new_status = %job.status,
            "Job status updated"
        );
        Some(job.clone())
    }

    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
