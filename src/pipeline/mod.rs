//! Pipeline stages for document-to-pages conversion.
//!
//! Each submodule owns exactly one step of a job, and the two external
//! engines sit behind traits so the orchestrator in [`crate::convert`] can be
//! driven by fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ render ──▶ extract
//! (job dirs)   (soffice)   (pdfium)
//! ```
//!
//! 1. [`workspace`]: per-job scratch tree `job-<id>/{input,rendered,pages}`,
//!    removed when dropped
//! 2. [`render`]:    run the office suite headless under a timeout to turn
//!    the input into one PDF
//! 3. [`extract`]:   split that PDF into `NNNN.pdf` single-page files; runs
//!    in `spawn_blocking` because pdfium is not async-safe

pub mod extract;
pub mod render;
pub mod workspace;

pub use extract::{ExtractedPages, PageExtractor, PdfiumPageExtractor};
pub use render::{RenderEngine, SofficeRenderer};
pub use workspace::JobWorkspace;
