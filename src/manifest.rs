//! The manifest: the durable, externally visible outcome of a job.
//!
//! Exactly one manifest is written per job, at `<prefix>manifest.json`.
//! Its `status` field discriminates the two shapes:
//!
//! ```json
//! { "jobId": "j1", "userId": "u1", "status": "succeeded",
//!   "pageCount": 2,
//!   "pages": [ { "page": 1, "key": "out/j1/pages/0001.pdf" },
//!              { "page": 2, "key": "out/j1/pages/0002.pdf" } ] }
//!
//! { "jobId": "j1", "userId": "u1", "status": "failed",
//!   "error": { "code": "CONVERSION_TIMEOUT",
//!              "message": "Conversion timed out after 180 seconds" } }
//! ```

use crate::error::ErrorCode;
use crate::job::{Job, JobId};
use serde::{Deserialize, Serialize};

/// MIME type the manifest is stored with.
pub const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// One uploaded page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// 1-based page number.
    pub page: usize,
    /// Storage key inside the destination bucket.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Manifest {
    #[serde(rename_all = "camelCase")]
    Succeeded {
        job_id: JobId,
        user_id: String,
        page_count: usize,
        pages: Vec<PageEntry>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: JobId,
        user_id: String,
        error: ErrorInfo,
    },
}

impl Manifest {
    pub fn succeeded(job: &Job, pages: Vec<PageEntry>) -> Self {
        Manifest::Succeeded {
            job_id: job.id.clone(),
            user_id: job.owner.clone(),
            page_count: pages.len(),
            pages,
        }
    }

    pub fn failed(job: &Job, code: ErrorCode, message: impl Into<String>) -> Self {
        Manifest::Failed {
            job_id: job.id.clone(),
            user_id: job.owner.clone(),
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }
    }

    /// Pretty-printed JSON body as stored in the bucket.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Manifest::Succeeded { .. })
    }
}
