//! Error types for the edgequake-deck2pages library.
//!
//! Three layers of errors, from the narrowest to the widest:
//!
//! * [`StageError`]: a **declared** pipeline failure with a stable
//!   [`ErrorCode`] (oversized input, render timeout, empty document, …).
//!   Raised by the render/extract adapters and the size check, and copied
//!   verbatim into the failure manifest.
//!
//! * [`PipelineError`]: everything the orchestrator can observe while
//!   running one job: stage errors plus storage, I/O, serialisation and
//!   task failures. [`PipelineError::failure`] folds any of them into the
//!   `(code, message)` pair recorded on the job.
//!
//! * [`Deck2PagesError`]: **fatal** service-level errors: bad
//!   configuration, an unusable job identifier, storage that cannot be
//!   built. Returned to callers of the service and the binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Longest message (in characters) kept for stderr excerpts and
/// unexpected-error messages.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Stable failure codes surfaced in failure manifests and job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FileTooLarge,
    ConversionTimeout,
    ConversionFailed,
    EmptyPdf,
    SplitFailed,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::ConversionTimeout => "CONVERSION_TIMEOUT",
            ErrorCode::ConversionFailed => "CONVERSION_FAILED",
            ErrorCode::EmptyPdf => "EMPTY_PDF",
            ErrorCode::SplitFailed => "SPLIT_FAILED",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared, coded failure of one pipeline stage.
///
/// The `Display` output is the human-readable message written to the
/// failure manifest; [`StageError::code`] is the machine-readable half.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Downloaded input exceeds the configured size limit.
    #[error("Input file is {size_mb:.1}MB, max is {max_mb}MB")]
    FileTooLarge { size_mb: f64, max_mb: u64 },

    /// The render engine did not finish within its deadline and was killed.
    #[error("Conversion timed out after {secs} seconds")]
    ConversionTimeout { secs: u64 },

    /// The render engine exited unsuccessfully or produced no output.
    #[error("{detail}")]
    ConversionFailed { detail: String },

    /// The rendered document has zero pages.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// Reading the rendered document or writing a page failed.
    #[error("Failed to split PDF: {detail}")]
    SplitFailed { detail: String },
}

impl StageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StageError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            StageError::ConversionTimeout { .. } => ErrorCode::ConversionTimeout,
            StageError::ConversionFailed { .. } => ErrorCode::ConversionFailed,
            StageError::EmptyDocument => ErrorCode::EmptyPdf,
            StageError::SplitFailed { .. } => ErrorCode::SplitFailed,
        }
    }
}

/// Failures of the blob store gateway.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("transfer failed for {bucket}/{key}: {reason}")]
    Transfer {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("storage backend misconfigured: {0}")]
    Config(String),

    #[error("local file error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that can go wrong while the orchestrator runs one job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("working directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest serialisation: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Fold this error into the `(code, message)` pair recorded on the job.
    ///
    /// Stage errors keep their own code and message; everything else
    /// becomes `UNEXPECTED_ERROR` with the message cut to
    /// [`MAX_ERROR_MESSAGE_CHARS`] characters.
    pub fn failure(&self) -> (ErrorCode, String) {
        match self {
            PipelineError::Stage(stage) => (stage.code(), stage.to_string()),
            other => (
                ErrorCode::UnexpectedError,
                truncate_chars(&other.to_string(), MAX_ERROR_MESSAGE_CHARS),
            ),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Fatal errors returned by the service, its configuration and bootstrap.
#[derive(Debug, Error)]
pub enum Deck2PagesError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied job identifier cannot be used.
    #[error("Invalid job id '{id}': {reason}")]
    InvalidJobId { id: String, reason: String },

    #[error("Blob storage unavailable: {0}")]
    Storage(#[from] StorageError),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keep at most `max` characters of `s`, respecting UTF-8 boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
