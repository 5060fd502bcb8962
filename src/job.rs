//! Job domain types: identifiers, locations, status and the job record.

use crate::error::{Deck2PagesError, ErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted job identifier.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Caller-supplied job identifier.
///
/// Identifiers namespace on-disk working directories, so they are limited
/// to `[A-Za-z0-9._-]`, must start with an ASCII alphanumeric character and
/// may be at most [`MAX_JOB_ID_LEN`] characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, Deck2PagesError> {
        let raw = raw.into();
        let invalid = |reason: &str| Deck2PagesError::InvalidJobId {
            id: raw.clone(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if raw.len() > MAX_JOB_ID_LEN {
            return Err(invalid("must be at most 128 characters"));
        }
        if !raw.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid("must start with a letter or digit"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("may only contain letters, digits, '.', '_' and '-'"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        JobId::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a job. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single object in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Bucket and key prefix under which a job's pages and manifest live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub bucket: String,
    prefix: String,
}

impl Destination {
    /// A non-empty prefix is normalised to end with `/`.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            bucket: bucket.into(),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the 1-based `page`: `<prefix>pages/NNNN.<extension>`.
    pub fn page_key(&self, page: usize, extension: &str) -> String {
        format!("{}pages/{page:04}.{extension}", self.prefix)
    }

    pub fn manifest_key(&self) -> String {
        format!("{}manifest.json", self.prefix)
    }

    pub fn manifest_ref(&self) -> BlobRef {
        BlobRef::new(self.bucket.clone(), self.manifest_key())
    }
}

/// Code and message of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// The in-memory record of one conversion job.
///
/// Owned by [`crate::registry::JobRegistry`]; everything else works on
/// cloned snapshots.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub status: JobStatus,
    pub source: BlobRef,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub page_count: Option<usize>,
    pub failure: Option<JobFailure>,
}

impl Job {
    pub fn new(id: JobId, owner: impl Into<String>, source: BlobRef, destination: Destination) -> Self {
        Self {
            id,
            owner: owner.into(),
            status: JobStatus::Queued,
            source,
            destination,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            page_count: None,
            failure: None,
        }
    }

    /// Manifest location, available once the job is terminal.
    pub fn manifest_ref(&self) -> Option<BlobRef> {
        self.status
            .is_terminal()
            .then(|| self.destination.manifest_ref())
    }
}
