//! Page extraction: split one PDF into single-page PDFs via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is synchronous and
//! keeps thread-local state. Loading and copying pages runs on the blocking
//! pool so Tokio worker threads keep serving other jobs and HTTP requests.

use crate::error::{Deck2PagesError, PipelineError, StageError};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Ordered single-page files produced from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPages {
    pub count: usize,
    /// `paths[i]` holds page `i + 1`.
    pub paths: Vec<PathBuf>,
}

/// Splits a rendered document into one file per page.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, rendered: &Path, output_dir: &Path)
        -> Result<ExtractedPages, PipelineError>;
}

/// File name of the 1-based `page`: `0001.pdf`, `0002.pdf`, …
pub fn page_file_name(page: usize) -> String {
    format!("{page:04}.pdf")
}

/// [`PageExtractor`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumPageExtractor {
    library_dir: Option<PathBuf>,
}

impl PdfiumPageExtractor {
    /// `library_dir` is the directory holding the pdfium shared library;
    /// `None` binds to the system library.
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Bind once up front so a missing library is reported at startup
    /// instead of on the first job.
    pub fn check_binding(&self) -> Result<(), Deck2PagesError> {
        bind_pdfium(self.library_dir.as_deref())
            .map(|_| ())
            .map_err(|e| Deck2PagesError::PdfiumBindingFailed(format!("{e:?}")))
    }
}

fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))?,
        None => Pdfium::bind_to_system_library()?,
    };
    Ok(Pdfium::new(bindings))
}

fn split_failed(e: impl std::fmt::Debug) -> StageError {
    StageError::SplitFailed {
        detail: format!("{e:?}"),
    }
}

#[async_trait]
impl PageExtractor for PdfiumPageExtractor {
    async fn extract(
        &self,
        rendered: &Path,
        output_dir: &Path,
    ) -> Result<ExtractedPages, PipelineError> {
        let library_dir = self.library_dir.clone();
        let rendered = rendered.to_path_buf();
        let output_dir = output_dir.to_path_buf();

        let pages = tokio::task::spawn_blocking(move || {
            split_blocking(library_dir.as_deref(), &rendered, &output_dir)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Extract task panicked: {e}")))??;

        Ok(pages)
    }
}

/// Blocking implementation of page splitting.
fn split_blocking(
    library_dir: Option<&Path>,
    rendered: &Path,
    output_dir: &Path,
) -> Result<ExtractedPages, StageError> {
    let pdfium = bind_pdfium(library_dir).map_err(split_failed)?;
    let document = pdfium.load_pdf_from_file(rendered, None).map_err(split_failed)?;

    let total = document.pages().len() as usize;
    if total == 0 {
        return Err(StageError::EmptyDocument);
    }
    info!("PDF loaded: {} pages", total);

    std::fs::create_dir_all(output_dir).map_err(split_failed)?;

    let mut paths = Vec::with_capacity(total);
    for idx in 0..total {
        let mut single = pdfium.create_new_pdf().map_err(split_failed)?;
        single
            .pages_mut()
            .copy_page_from_document(&document, idx as PdfPageIndex, 0)
            .map_err(split_failed)?;

        let path = output_dir.join(page_file_name(idx + 1));
        single.save_to_file(&path).map_err(split_failed)?;
        debug!("Wrote page {} → {}", idx + 1, path.display());
        paths.push(path);
    }

    Ok(ExtractedPages {
        count: paths.len(),
        paths,
    })
}
