//! HTTP surface: job creation, job status and health.
//!
//! | method | path | body / query | response |
//! |--------|------|--------------|----------|
//! | `POST` | `/v1/jobs` | [`CreateJobRequest`] | [`CreateJobResponse`] |
//! | `GET`  | `/v1/jobs/{job_id}` | `?userId=` | [`JobStatusResponse`] or 404 |
//! | `GET`  | `/health` | | [`HealthResponse`] |

use crate::job::{BlobRef, Destination, JobId, JobStatus};
use crate::service::{JobRequest, JobService};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

/// Bucket plus key (or key prefix, for outputs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_id: String,
    pub user_id: String,
    pub input: BlobLocation,
    /// `key` is the prefix all outputs are written under.
    pub output: BlobLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    /// Set once the job is terminal.
    pub manifest: Option<BlobLocation>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub active_jobs: usize,
    pub concurrency: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

impl From<BlobRef> for BlobLocation {
    fn from(r: BlobRef) -> Self {
        Self {
            bucket: r.bucket,
            key: r.key,
        }
    }
}

pub fn create_router(service: JobService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/jobs", post(create_job_handler))
        .route("/v1/jobs/{job_id}", get(job_status_handler))
        .layer(trace_layer)
        .layer(cors)
        .with_state(service)
}

pub async fn health_handler(State(service): State<JobService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            service: service.service_name().to_string(),
            active_jobs: service.active_jobs(),
            concurrency: service.concurrency(),
        }),
    )
}

#[tracing::instrument(skip(service, request), fields(job_id = %request.job_id, user_id = %request.user_id))]
pub async fn create_job_handler(
    State(service): State<JobService>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    let job_id = match JobId::parse(request.job_id.as_str()) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if request.user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "userId must not be empty");
    }

    let submission = service
        .submit(JobRequest {
            job_id,
            user_id: request.user_id,
            source: BlobRef::new(request.input.bucket, request.input.key),
            destination: Destination::new(request.output.bucket, request.output.key),
        })
        .await;
    if submission.handle.is_some() {
        info!("Job queued for conversion");
    }

    (
        StatusCode::OK,
        Json(CreateJobResponse {
            job_id: submission.job.id.to_string(),
            status: submission.job.status,
        }),
    )
        .into_response()
}

#[tracing::instrument(skip(service, query))]
pub async fn job_status_handler(
    State(service): State<JobService>,
    Path(job_id): Path<String>,
    Query(query): Query<JobStatusQuery>,
) -> Response {
    let not_found = || error_response(StatusCode::NOT_FOUND, "Job not found");

    // A malformed id can never have been admitted.
    let Ok(id) = JobId::parse(job_id) else {
        return not_found();
    };
    let Some(job) = service.query(&id, &query.user_id).await else {
        return not_found();
    };

    let manifest = job.manifest_ref().map(BlobLocation::from);
    (
        StatusCode::OK,
        Json(JobStatusResponse {
            job_id: job.id.to_string(),
            user_id: job.owner,
            status: job.status,
            manifest,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }),
    )
        .into_response()
}
