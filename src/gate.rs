//! Admission gate: bounds how many pipelines run at once.
//!
//! A `tokio::sync::Semaphore` with `N` permits. Waiting for a permit parks
//! only the waiting task. Permit acquisition order is whatever the
//! semaphore yields; callers must not rely on FIFO admission.

use crate::job::JobId;
use crate::registry::{JobRegistry, StatusUpdate};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    registry: Arc<JobRegistry>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionGate {
    /// `limit` is clamped to at least one slot.
    pub fn new(registry: Arc<JobRegistry>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            registry,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a free slot, mark `job_id` as running, then drive `task`.
    ///
    /// The slot is released when `task` finishes, whatever its outcome.
    /// The task's output (including any `Err`) is handed back unchanged, and
    /// a panic inside the task unwinds through here after the permit drops.
    pub async fn run_bounded<F>(&self, job_id: &JobId, task: F) -> F::Output
    where
        F: Future,
    {
        // The semaphore is never closed.
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("admission semaphore closed");

        debug!(job_id = %job_id, active = self.active(), limit = self.limit, "Slot acquired");
        self.registry
            .update_status(job_id, StatusUpdate::running())
            .await;

        task.await
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BlobRef, Destination, JobStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn registry_with(ids: &[&str]) -> Arc<JobRegistry> {
        let registry = Arc::new(JobRegistry::new());
        for raw in ids {
            registry
                .create_job(
                    JobId::parse(*raw).unwrap(),
                    "u1",
                    BlobRef::new("bkt", "in.pptx"),
                    Destination::new("bkt", "out/"),
                )
                .await;
        }
        registry
    }

    #[tokio::test]
    async fn marks_job_running_before_task() {
        let registry = registry_with(&["j1"]).await;
        let gate = AdmissionGate::new(Arc::clone(&registry), 1);
        let id = JobId::parse("j1").unwrap();

        let seen = gate
            .run_bounded(&id, async {
                registry.get_job(&id).await.map(|j| j.status)
            })
            .await;
        assert_eq!(seen, Some(JobStatus::Running));
        assert_eq!(gate.active(), 0);
    }

    #[tokio::test]
    async fn error_propagates_and_releases_slot() {
        let registry = registry_with(&["j1"]).await;
        let gate = AdmissionGate::new(registry, 1);
        let id = JobId::parse("j1").unwrap();

        let result: Result<(), &str> = gate.run_bounded(&id, async { Err("boom") }).await;
        tokio_test::assert_err!(result);
        assert_eq!(gate.active(), 0);

        let again: Result<u8, &str> = gate.run_bounded(&id, async { Ok(7) }).await;
        assert_eq!(tokio_test::assert_ok!(again), 7);
    }

    #[tokio::test]
    async fn panicking_task_releases_slot() {
        let registry = registry_with(&["j1"]).await;
        let gate = AdmissionGate::new(registry, 1);
        let id = JobId::parse("j1").unwrap();

        let g = gate.clone();
        let i = id.clone();
        let joined = tokio::spawn(async move {
            g.run_bounded(&i, async { panic!("task blew up") }).await
        })
        .await;
        assert!(joined.is_err());
        assert_eq!(gate.active(), 0);
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let ids: Vec<String> = (0..6).map(|n| format!("j{n}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let registry = registry_with(&refs).await;
        let gate = AdmissionGate::new(Arc::clone(&registry), 2);

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ids
            .iter()
            .map(|raw| {
                let gate = gate.clone();
                let id = JobId::parse(raw.as_str()).unwrap();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    gate.run_bounded(&id, async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(registry.count_by_status(JobStatus::Running).await, 6);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let gate = AdmissionGate::new(Arc::new(JobRegistry::new()), 0);
        assert_eq!(gate.limit(), 1);
        assert_eq!(gate.active(), 0);
    }
}
