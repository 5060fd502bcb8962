//! # edgequake-deck2pages
//!
//! Convert stored office documents into one PDF per page, as background jobs.
//!
//! A client submits a job naming a source object and a destination prefix,
//! then polls until the job is terminal. The result is always a manifest at
//! `<prefix>manifest.json`: either the ordered list of page objects or an
//! error code and message.
//!
//! ## Job Lifecycle
//!
//! ```text
//! submit ─▶ queued ─▶ (admission gate, N slots) ─▶ running ─┬─▶ succeeded
//!                                                           └─▶ failed
//! ```
//!
//! ## Pipeline Overview
//!
//! ```text
//! source object
//!  │
//!  ├─ 1. Workspace  fresh job-<id>/{input,rendered,pages}
//!  ├─ 2. Download   object → input/, reject oversize input
//!  ├─ 3. Render     soffice --headless --convert-to pdf (timeout, kill)
//!  ├─ 4. Extract    split into pages/NNNN.pdf via pdfium (spawn_blocking)
//!  ├─ 5. Upload     <prefix>pages/NNNN.pdf in page order
//!  └─ 6. Manifest   <prefix>manifest.json, then mark succeeded
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_deck2pages::{
//!     BlobRef, Destination, JobId, JobRequest, JobService, ObjectBlobStore,
//!     PdfiumPageExtractor, ServiceConfig, SofficeRenderer, StorageConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .storage(StorageConfig::Local { root: "./buckets".into() })
//!         .build()?;
//!     let service = JobService::new(
//!         &config,
//!         Arc::new(ObjectBlobStore::from_config(&config.storage)),
//!         Arc::new(SofficeRenderer::from_config(&config)),
//!         Arc::new(PdfiumPageExtractor::new(config.pdfium_lib_path.clone())),
//!     );
//!
//!     let submission = service
//!         .submit(JobRequest {
//!             job_id: JobId::parse("j1")?,
//!             user_id: "u1".into(),
//!             source: BlobRef::new("uploads", "decks/q3.pptx"),
//!             destination: Destination::new("outputs", "out/j1/"),
//!         })
//!         .await;
//!     if let Some(handle) = submission.handle {
//!         let job = handle.await?;
//!         println!("{:?}", job.map(|j| j.status));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deck2pages` binary and `telemetry` (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod gate;
pub mod http;
pub mod job;
pub mod manifest;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod storage;
#[cfg(feature = "cli")]
pub mod telemetry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, StorageConfig};
pub use convert::ConversionPipeline;
pub use error::{Deck2PagesError, ErrorCode, PipelineError, StageError, StorageError};
pub use gate::AdmissionGate;
pub use http::create_router;
pub use job::{BlobRef, Destination, Job, JobId, JobStatus};
pub use manifest::{Manifest, PageEntry};
pub use pipeline::{
    ExtractedPages, PageExtractor, PdfiumPageExtractor, RenderEngine, SofficeRenderer,
};
pub use registry::{Admission, JobRegistry, StatusUpdate};
pub use service::{JobRequest, JobService, Submission};
pub use storage::{BlobStore, ObjectBlobStore};
#[cfg(feature = "cli")]
pub use telemetry::{init_tracing, LogFormat};
