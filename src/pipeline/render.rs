//! Document rendering: turn an office document into a PDF with LibreOffice.
//!
//! ## Why a private profile per invocation?
//!
//! `soffice` keeps its user profile under `UserInstallation` and refuses to
//! start a second instance against a profile that is already in use. Each
//! render therefore gets its own `lo-profile-<job_id>-*` directory, held as a
//! `TempDir` so it is deleted when the call returns, whatever the outcome.
//!
//! ## Timeout
//!
//! The child's exit and the end of its stdout/stderr are awaited under a
//! single `tokio::time::timeout`. On expiry the child is killed and reaped and
//! the output readers are dropped before [`StageError::ConversionTimeout`] is
//! returned, so a hung office process never outlives its job.

use crate::config::ServiceConfig;
use crate::error::{truncate_chars, PipelineError, StageError, MAX_ERROR_MESSAGE_CHARS};
use crate::job::JobId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Turns one input document into one PDF.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Render `input` into `output_dir` and return the produced PDF's path.
    async fn render(
        &self,
        input: &Path,
        output_dir: &Path,
        job_id: &JobId,
    ) -> Result<PathBuf, PipelineError>;
}

/// [`RenderEngine`] that shells out to LibreOffice's `soffice`.
#[derive(Debug, Clone)]
pub struct SofficeRenderer {
    binary: String,
    timeout: Duration,
    profile_root: PathBuf,
}

impl SofficeRenderer {
    pub fn new(binary: impl Into<String>, timeout: Duration, profile_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            profile_root: profile_root.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.soffice_bin.clone(),
            config.conversion_timeout(),
            config.work_dir.clone(),
        )
    }
}

/// The fixed `soffice` argument list.
fn soffice_args(profile: &Path, output_dir: &Path, input: &Path) -> Vec<String> {
    vec![
        "--headless".into(),
        "--nologo".into(),
        "--nolockcheck".into(),
        "--norestore".into(),
        format!("-env:UserInstallation=file://{}", profile.display()),
        "--convert-to".into(),
        "pdf".into(),
        "--outdir".into(),
        output_dir.display().to_string(),
        input.display().to_string(),
    ]
}

fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!(error = %e, "Reading child output failed");
            }
        }
        buf
    })
}

#[async_trait]
impl RenderEngine for SofficeRenderer {
    async fn render(
        &self,
        input: &Path,
        output_dir: &Path,
        job_id: &JobId,
    ) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.profile_root)
            .await
            .map_err(|e| PipelineError::io(&self.profile_root, e))?;
        let profile = tempfile::Builder::new()
            .prefix(&format!("lo-profile-{job_id}-"))
            .tempdir_in(&self.profile_root)
            .map_err(|e| PipelineError::io(&self.profile_root, e))?;
        let profile_path =
            std::path::absolute(profile.path()).map_err(|e| PipelineError::io(profile.path(), e))?;

        let args = soffice_args(&profile_path, output_dir, input);
        info!(job_id = %job_id, binary = %self.binary, input = %input.display(), "Starting render");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StageError::ConversionFailed {
                detail: format!("Failed to start LibreOffice ({}): {e}", self.binary),
            })?;

        let mut stdout = drain(child.stdout.take());
        let mut stderr = drain(child.stderr.take());

        // One deadline covers exit and pipe EOF: helpers forked by the
        // launcher can keep the pipes open after the direct child is gone.
        let finished = tokio::time::timeout(self.timeout, async {
            let (status, out, err) = tokio::join!(child.wait(), &mut stdout, &mut stderr);
            (status, out.unwrap_or_default(), err.unwrap_or_default())
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok((Ok(status), out, err)) => (status, out, err),
            Ok((Err(e), _, _)) => {
                return Err(StageError::ConversionFailed {
                    detail: format!("Failed waiting for LibreOffice: {e}"),
                }
                .into());
            }
            Err(_) => {
                warn!(job_id = %job_id, timeout_secs = self.timeout.as_secs(), "Render timed out; killing soffice");
                if let Err(e) = child.kill().await {
                    debug!(job_id = %job_id, error = %e, "soffice already exited");
                }
                stdout.abort();
                stderr.abort();
                return Err(StageError::ConversionTimeout {
                    secs: self.timeout.as_secs(),
                }
                .into());
            }
        };

        debug!(job_id = %job_id, stdout = %String::from_utf8_lossy(&stdout).trim(), "soffice finished");

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| status.to_string(), |c| c.to_string());
            let stderr = truncate_chars(&String::from_utf8_lossy(&stderr), MAX_ERROR_MESSAGE_CHARS);
            return Err(StageError::ConversionFailed {
                detail: format!("LibreOffice exited with code {code}: {stderr}"),
            }
            .into());
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let output = output_dir.join(format!("{stem}.pdf"));
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(StageError::ConversionFailed {
                detail: format!("LibreOffice produced no output: expected {}", output.display()),
            }
            .into());
        }

        info!(job_id = %job_id, output = %output.display(), "Render complete");
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    // Spawning a freshly written script races with concurrent forks
    // (ETXTBSY), so these tests take turns.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn fake_soffice(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-soffice");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    const WRITES_PDF: &str = r#"printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    *) input="$1"; shift ;;
  esac
done
name=$(basename "$input")
printf '%%PDF-1.4 fake' > "$outdir/${name%.*}.pdf""#;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        input: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let input = root.join("deck.pptx");
        std::fs::write(&input, b"not really a deck").unwrap();
        let out = root.join("rendered");
        std::fs::create_dir_all(&out).unwrap();
        Fixture {
            _tmp: tmp,
            root,
            input,
            out,
        }
    }

    fn profiles_left(root: &Path) -> usize {
        std::fs::read_dir(root)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("lo-profile-"))
            .count()
    }

    fn job() -> JobId {
        JobId::parse("j1").unwrap()
    }

    #[tokio::test]
    async fn success_returns_stem_pdf_and_cleans_profile() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(&fx.root, WRITES_PDF);
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(10), &fx.root);

        let output = renderer.render(&fx.input, &fx.out, &job()).await.unwrap();
        assert_eq!(output, fx.out.join("deck.pdf"));
        assert!(output.is_file());
        assert_eq!(profiles_left(&fx.root), 0);

        let args = std::fs::read_to_string(fx.root.join("args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(&args[..4], ["--headless", "--nologo", "--nolockcheck", "--norestore"]);
        assert!(args[4].starts_with("-env:UserInstallation=file:///"));
        assert!(args[4].contains("lo-profile-j1-"));
        assert_eq!(&args[5..7], ["--convert-to", "pdf"]);
        assert_eq!(args[7], "--outdir");
        assert_eq!(args[9], fx.input.display().to_string());
    }

    #[tokio::test]
    async fn nonzero_exit_is_conversion_failed_with_stderr() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(&fx.root, "echo 'boom: cannot load' >&2\nexit 3");
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(10), &fx.root);

        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        match err {
            PipelineError::Stage(StageError::ConversionFailed { detail }) => {
                assert!(detail.starts_with("LibreOffice exited with code 3: "), "{detail}");
                assert!(detail.contains("boom: cannot load"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(profiles_left(&fx.root), 0);
    }

    #[tokio::test]
    async fn stderr_excerpt_is_capped() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(
            &fx.root,
            "head -c 2000 /dev/zero | tr '\\0' 'x' >&2\nexit 1",
        );
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(10), &fx.root);

        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        let (_, message) = err.failure();
        let excerpt = message
            .strip_prefix("LibreOffice exited with code 1: ")
            .unwrap();
        assert_eq!(excerpt.chars().count(), MAX_ERROR_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn hung_process_times_out_and_is_killed() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(&fx.root, "exec sleep 30");
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(1), &fx.root);

        let started = std::time::Instant::now();
        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            err,
            PipelineError::Stage(StageError::ConversionTimeout { secs: 1 })
        ));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(profiles_left(&fx.root), 0);
    }

    #[tokio::test]
    async fn forked_helper_holding_pipes_still_times_out() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(&fx.root, "sleep 8 &\nexit 0");
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(1), &fx.root);

        let started = std::time::Instant::now();
        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "render took {:?}",
            started.elapsed()
        );
        assert_eq!(err.failure().0, crate::error::ErrorCode::ConversionTimeout);
        assert_eq!(profiles_left(&fx.root), 0);
    }

    #[tokio::test]
    async fn clean_exit_without_output_is_conversion_failed() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let fx = fixture();
        let bin = fake_soffice(&fx.root, "exit 0");
        let renderer = SofficeRenderer::new(bin, Duration::from_secs(10), &fx.root);

        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        let (code, message) = err.failure();
        assert_eq!(code, crate::error::ErrorCode::ConversionFailed);
        assert!(message.contains("produced no output"), "{message}");
    }

    #[tokio::test]
    async fn missing_binary_is_conversion_failed() {
        let fx = fixture();
        let renderer = SofficeRenderer::new(
            fx.root.join("no-such-soffice").display().to_string(),
            Duration::from_secs(10),
            &fx.root,
        );
        let err = renderer.render(&fx.input, &fx.out, &job()).await.unwrap_err();
        assert_eq!(err.failure().0, crate::error::ErrorCode::ConversionFailed);
        assert_eq!(profiles_left(&fx.root), 0);
    }
}
