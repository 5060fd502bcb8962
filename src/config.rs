//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. The binary maps command-line flags and
//! environment variables onto the builder; library users and tests set only
//! the fields they care about and rely on the defaults for the rest.

use crate::error::Deck2PagesError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_deck2pages::{ServiceConfig, StorageConfig};
///
/// let config = ServiceConfig::builder()
///     .concurrency(2)
///     .conversion_timeout_secs(60)
///     .storage(StorageConfig::Memory)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Name reported by the health endpoint and in startup logs.
    pub service_name: String,

    /// Address the HTTP server binds to. Default: `0.0.0.0`.
    pub host: String,

    /// Port the HTTP server binds to. Default: 8080.
    pub port: u16,

    /// Maximum number of conversions running at the same time. Default: 1.
    ///
    /// Each conversion owns one `soffice` process, which is memory hungry;
    /// size this to the host rather than to the request rate. Jobs above the
    /// limit stay `queued` until a slot frees up.
    pub concurrency: usize,

    /// Wall-clock limit for a single render invocation, in seconds. Default: 180.
    ///
    /// Only the render step is bounded. Downloads, uploads and page
    /// extraction have no deadline of their own.
    pub conversion_timeout_secs: u64,

    /// Largest accepted input document, in MiB. Default: 100.
    pub max_input_size_mb: u64,

    /// Root of per-job working directories and render profiles.
    /// Default: `$TMPDIR/deck2pages`.
    pub work_dir: PathBuf,

    /// Path or name of the LibreOffice binary. Default: `soffice`.
    pub soffice_bin: String,

    /// Directory containing the pdfium shared library. `None` binds to the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Where source documents are read from and outputs written to.
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "deck2pages".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            concurrency: 1,
            conversion_timeout_secs: 180,
            max_input_size_mb: 100,
            work_dir: std::env::temp_dir().join("deck2pages"),
            soffice_bin: "soffice".to_string(),
            pdfium_lib_path: None,
            storage: StorageConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    /// Size limit in bytes.
    pub fn max_input_size_bytes(&self) -> u64 {
        self.max_input_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn max_input_size_mb(mut self, mb: u64) -> Self {
        self.config.max_input_size_mb = mb;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn soffice_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.soffice_bin = bin.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Deck2PagesError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Deck2PagesError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(Deck2PagesError::InvalidConfig(
                "Conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_input_size_mb == 0 {
            return Err(Deck2PagesError::InvalidConfig(
                "Maximum input size must be ≥ 1 MB".into(),
            ));
        }
        if c.soffice_bin.trim().is_empty() {
            return Err(Deck2PagesError::InvalidConfig(
                "soffice binary path must not be empty".into(),
            ));
        }
        if let StorageConfig::Local { root } = &c.storage {
            if root.as_os_str().is_empty() {
                return Err(Deck2PagesError::InvalidConfig(
                    "Local storage root must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Blob storage backend.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Amazon S3 or an S3-compatible endpoint (MinIO, LocalStack).
    ///
    /// Credentials left unset fall back to the standard AWS environment
    /// and instance-profile chain.
    S3 {
        region: String,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
    /// A directory on local disk; each bucket is a sub-directory of `root`.
    Local { root: PathBuf },
    /// Process-local in-memory buckets. Contents vanish on exit.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::S3 {
            region: "us-east-2".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }
}
