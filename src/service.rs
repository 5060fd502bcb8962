//! Job admission: registry + admission gate + pipeline.

use crate::config::ServiceConfig;
use crate::convert::ConversionPipeline;
use crate::gate::AdmissionGate;
use crate::job::{BlobRef, Destination, Job, JobId};
use crate::pipeline::{PageExtractor, RenderEngine};
use crate::registry::JobRegistry;
use crate::storage::BlobStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A validated request to convert one document.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub user_id: String,
    pub source: BlobRef,
    pub destination: Destination,
}

/// What [`JobService::submit`] did with a request.
#[derive(Debug)]
pub struct Submission {
    /// Snapshot of the job as stored (possibly created by an earlier call).
    pub job: Job,
    /// Background pipeline task; `None` when the job already existed.
    pub handle: Option<JoinHandle<Option<Job>>>,
}

/// Entry point for creating and querying jobs.
///
/// Submitting a new job identifier schedules exactly one background run;
/// resubmitting a known identifier only returns the stored record.
#[derive(Clone)]
pub struct JobService {
    service_name: String,
    registry: Arc<JobRegistry>,
    gate: AdmissionGate,
    pipeline: Arc<ConversionPipeline>,
}

impl JobService {
    pub fn new(
        config: &ServiceConfig,
        store: Arc<dyn BlobStore>,
        renderer: Arc<dyn RenderEngine>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let gate = AdmissionGate::new(Arc::clone(&registry), config.concurrency);
        let pipeline = Arc::new(ConversionPipeline::new(
            config,
            Arc::clone(&registry),
            store,
            renderer,
            extractor,
        ));
        Self {
            service_name: config.service_name.clone(),
            registry,
            gate,
            pipeline,
        }
    }

    /// Register the job and, if it is new, start its pipeline in the
    /// background behind the admission gate.
    pub async fn submit(&self, request: JobRequest) -> Submission {
        let admission = self
            .registry
            .create_job(
                request.job_id,
                &request.user_id,
                request.source,
                request.destination,
            )
            .await;

        if !admission.is_new() {
            return Submission {
                job: admission.into_job(),
                handle: None,
            };
        }

        let job = admission.into_job();
        let gate = self.gate.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            gate.run_bounded(&task_job.id, pipeline.run(&task_job)).await
        });
        debug!(job_id = %job.id, "Pipeline scheduled");

        Submission {
            job,
            handle: Some(handle),
        }
    }

    /// The job, if it exists and belongs to `caller`.
    ///
    /// Unknown jobs and jobs owned by someone else are indistinguishable.
    pub async fn query(&self, job_id: &JobId, caller: &str) -> Option<Job> {
        self.registry
            .get_job(job_id)
            .await
            .filter(|job| job.owner == caller)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Pipelines currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.gate.active()
    }

    pub fn concurrency(&self) -> usize {
        self.gate.limit()
    }
}
