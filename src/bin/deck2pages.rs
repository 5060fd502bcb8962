//! `deck2pages`: document-to-pages conversion service.
//!
//! Two modes:
//!
//! * `serve` runs the HTTP job API until Ctrl-C.
//! * `run` converts a single document in-process, prints the published
//!   manifest on stdout and exits non-zero when the job failed.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgequake_deck2pages::{
    create_router, init_tracing, BlobRef, BlobStore, Destination, JobId, JobRequest, JobService,
    JobStatus, LogFormat, ObjectBlobStore, PdfiumPageExtractor, ServiceConfig, SofficeRenderer,
    StorageConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the job API against S3 (credentials from the usual AWS_* variables)
  deck2pages serve --port 8080 --concurrency 2

  # Serve against a local directory, one sub-directory per bucket
  deck2pages serve --storage local --storage-root ./buckets

  # Convert one deck and print its manifest
  deck2pages run --storage local --storage-root ./buckets \
      --job-id j1 --user-id u1 --input uploads/deck.pptx --output outputs/out/j1/

ENVIRONMENT:
  Every flag can also be set through the variable shown in its help text.
  PDFIUM_LIB_PATH points at the directory holding libpdfium; without it the
  system library is used. RUST_LOG overrides the log filter.
"#;

/// Convert stored office documents into one PDF per page.
#[derive(Parser, Debug)]
#[command(
    name = "deck2pages",
    version,
    about = "Convert stored office documents into one PDF per page",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DECK2PAGES_VERBOSE")]
    verbose: bool,

    /// Log output format.
    #[arg(long, global = true, env = "DECK2PAGES_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormatArg,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP job API.
    Serve(ServeArgs),
    /// Convert one document and wait for the result.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    service: ServiceArgs,

    /// Address to bind.
    #[arg(long, env = "DECK2PAGES_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, env = "DECK2PAGES_PORT", default_value_t = 8080)]
    port: u16,

    /// Name reported by /health.
    #[arg(long, env = "DECK2PAGES_SERVICE_NAME", default_value = "deck2pages")]
    service_name: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    service: ServiceArgs,

    /// Job identifier ([A-Za-z0-9._-], up to 128 characters).
    #[arg(long)]
    job_id: String,

    /// Owner recorded on the job and in the manifest.
    #[arg(long)]
    user_id: String,

    /// Source object as `bucket/key` (an `s3://` prefix is accepted).
    #[arg(long, value_parser = parse_location)]
    input: Location,

    /// Destination as `bucket/prefix`.
    #[arg(long, value_parser = parse_location)]
    output: Location,

    /// Disable the spinner.
    #[arg(long, env = "DECK2PAGES_NO_PROGRESS")]
    no_progress: bool,
}

/// Settings shared by both modes.
#[derive(Args, Debug)]
struct ServiceArgs {
    /// Maximum number of conversions running at once.
    #[arg(short, long, env = "DECK2PAGES_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Render timeout in seconds.
    #[arg(long, env = "DECK2PAGES_CONVERSION_TIMEOUT", default_value_t = 180)]
    conversion_timeout: u64,

    /// Largest accepted input, in MB.
    #[arg(long, env = "DECK2PAGES_MAX_INPUT_MB", default_value_t = 100)]
    max_input_mb: u64,

    /// Root for per-job working directories. Defaults to $TMPDIR/deck2pages.
    #[arg(long, env = "DECK2PAGES_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// LibreOffice binary.
    #[arg(long, env = "DECK2PAGES_SOFFICE_BIN", default_value = "soffice")]
    soffice_bin: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Blob storage backend.
    #[arg(long, env = "DECK2PAGES_STORAGE", value_enum, default_value = "s3")]
    storage: StorageKind,

    /// Root directory for `--storage local`.
    #[arg(long, env = "DECK2PAGES_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// AWS region for `--storage s3`.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-2")]
    aws_region: String,

    /// Custom S3 endpoint (MinIO, LocalStack).
    #[arg(long, env = "DECK2PAGES_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Allow plain-HTTP S3 endpoints.
    #[arg(long, env = "DECK2PAGES_S3_ALLOW_HTTP")]
    s3_allow_http: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageKind {
    S3,
    Local,
    Memory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    bucket: String,
    key: String,
}

/// Accepts `bucket/key`, `bucket/` and `s3://bucket/key`.
fn parse_location(raw: &str) -> Result<Location, String> {
    let trimmed = raw.strip_prefix("s3://").unwrap_or(raw);
    let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if bucket.is_empty() {
        return Err(format!("'{raw}' has no bucket; expected bucket/key"));
    }
    Ok(Location {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

impl ServiceArgs {
    fn storage_config(&self) -> Result<StorageConfig> {
        Ok(match self.storage {
            StorageKind::S3 => StorageConfig::S3 {
                region: self.aws_region.clone(),
                endpoint: self.s3_endpoint.clone(),
                access_key_id: None,
                secret_access_key: None,
                allow_http: self.s3_allow_http,
            },
            StorageKind::Local => StorageConfig::Local {
                root: self
                    .storage_root
                    .clone()
                    .context("--storage local requires --storage-root")?,
            },
            StorageKind::Memory => StorageConfig::Memory,
        })
    }

    fn config(&self, host: Option<(&str, u16, &str)>) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .concurrency(self.concurrency)
            .conversion_timeout_secs(self.conversion_timeout)
            .max_input_size_mb(self.max_input_mb)
            .soffice_bin(self.soffice_bin.clone())
            .storage(self.storage_config()?);
        if let Some(dir) = &self.work_dir {
            builder = builder.work_dir(dir.clone());
        }
        if let Some(path) = &self.pdfium_lib_path {
            builder = builder.pdfium_lib_path(path.clone());
        }
        if let Some((host, port, name)) = host {
            builder = builder.host(host).port(port).service_name(name);
        }
        builder.build().context("Invalid configuration")
    }
}

/// Build the service and its collaborators from `config`.
fn build_service(config: &ServiceConfig) -> Result<(JobService, Arc<dyn BlobStore>)> {
    let extractor = PdfiumPageExtractor::new(config.pdfium_lib_path.clone());
    extractor
        .check_binding()
        .context("PDF engine unavailable")?;

    let store: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::from_config(&config.storage));
    let service = JobService::new(
        config,
        Arc::clone(&store),
        Arc::new(SofficeRenderer::from_config(config)),
        Arc::new(extractor),
    );
    Ok((service, store))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format.into(), cli.verbose);

    match cli.command {
        Command::Serve(args) => serve(args).await.map(|()| ExitCode::SUCCESS),
        Command::Run(args) => run_one(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args
        .service
        .config(Some((args.host.as_str(), args.port, args.service_name.as_str())))?;
    let (service, _store) = build_service(&config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        address = %addr,
        service = %config.service_name,
        concurrency = config.concurrency,
        conversion_timeout_secs = config.conversion_timeout_secs,
        max_input_size_mb = config.max_input_size_mb,
        "Server listening"
    );

    axum::serve(listener, create_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_one(args: RunArgs) -> Result<ExitCode> {
    let config = args.service.config(None)?;
    let (service, store) = build_service(&config)?;

    let job_id = JobId::parse(args.job_id.as_str())?;
    let destination = Destination::new(args.output.bucket, args.output.key);
    let manifest = destination.manifest_ref();

    let submission = service
        .submit(JobRequest {
            job_id: job_id.clone(),
            user_id: args.user_id.clone(),
            source: BlobRef::new(args.input.bucket, args.input.key),
            destination,
        })
        .await;
    let Some(mut handle) = submission.handle else {
        bail!("job {job_id} was already submitted");
    };

    let spinner = (!args.no_progress).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix(job_id.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let finished = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("pipeline task failed")?,
            _ = poll.tick() => {
                if let (Some(bar), Some(job)) = (&spinner, service.query(&job_id, &args.user_id).await) {
                    bar.set_message(job.status.to_string());
                }
            }
        }
    };
    let finished = finished.context("job vanished from the registry")?;

    if let Some(bar) = &spinner {
        let mark = if finished.status == JobStatus::Succeeded { "✓" } else { "✗" };
        bar.finish_with_message(format!("{} {mark}", finished.status));
    }

    let body = store
        .get_bytes(&manifest.bucket, &manifest.key)
        .await
        .with_context(|| format!("Failed to read manifest {manifest}"))?;
    println!("{}", String::from_utf8_lossy(&body));

    Ok(if finished.status == JobStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
