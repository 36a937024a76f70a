//! Local LibreOffice engine: one headless `soffice` process per conversion.
//!
//! ## Isolation
//!
//! LibreOffice keeps a user profile (registry, lock file) that two concurrent
//! processes must not share: the second one either blocks on the lock or
//! silently hands the job to the first instance and exits 0 without output.
//! Every call therefore gets its own scratch directory holding the input, the
//! output and a private profile passed via `-env:UserInstallation`. The
//! directory is a [`tempfile::TempDir`], so it disappears when the call
//! returns, fails, or is cancelled.
//!
//! ## Cancellation
//!
//! `soffice` on most distributions is a launcher that starts `oosplash`,
//! which in turn forks `soffice.bin`. Killing the direct child alone would
//! leave `soffice.bin` running against a scratch directory that is about to
//! vanish. On Unix the child therefore leads its own process group, and a
//! conversion abandoned before the child exits (the orchestrator's timeout)
//! kills the whole group before the scratch directory is removed. Elsewhere
//! only the direct child is killed (`kill_on_drop`).

use super::{ensure_pdf, ConversionEngine};
use crate::config::{DOCX_EXTENSION, PDF_EXTENSION};
use crate::error::EngineError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Input file name inside the scratch directory.
const INPUT_STEM: &str = "input";

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 500;

/// Headless LibreOffice invoked as a child process.
#[derive(Debug, Clone)]
pub struct SofficeEngine {
    binary: PathBuf,
}

impl SofficeEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl ConversionEngine for SofficeEngine {
    fn name(&self) -> &str {
        "soffice"
    }

    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let start = Instant::now();
        let scratch = tempfile::Builder::new().prefix("docx2pdf-").tempdir()?;
        let input_path = scratch
            .path()
            .join(format!("{}.{}", INPUT_STEM, DOCX_EXTENSION));
        let output_path = scratch
            .path()
            .join(format!("{}.{}", INPUT_STEM, PDF_EXTENSION));
        let profile_dir = scratch.path().join("profile");

        tokio::fs::write(&input_path, &input).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation={}", file_url(&profile_dir)))
            .arg("--convert-to")
            .arg(PDF_EXTENSION)
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => EngineError::Unavailable(format!(
                "'{}' not found; install LibreOffice or set --soffice-path",
                self.binary.display()
            )),
            _ => EngineError::Unavailable(format!(
                "failed to start '{}': {}",
                self.binary.display(),
                e
            )),
        })?;
        let group = ProcessGroup::new(child.id());
        let output = child.wait_with_output().await?;
        group.disarm();

        let stderr = excerpt(&output.stderr);
        if !output.status.success() {
            return Err(EngineError::Failed(format!(
                "soffice exited with {}: {}",
                output.status, stderr
            )));
        }

        let pdf = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::Failed(format!(
                    "soffice exited successfully but wrote no PDF: {}",
                    stderr
                )));
            }
            Err(e) => return Err(EngineError::Io(e)),
        };

        debug!(
            "soffice converted {} bytes into {} bytes in {:?}",
            input.len(),
            pdf.len(),
            start.elapsed()
        );
        ensure_pdf(pdf)
    }
}

/// Kills the child's process group when dropped while still armed, i.e. when
/// the conversion future is dropped before the child has exited.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// The child has exited; its group is no longer ours to signal.
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: killpg only sends a signal, to the group the child was
            // started as the leader of.
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc == 0 {
                debug!("Killed abandoned soffice process group {}", pgid);
            }
        }
        #[cfg(not(unix))]
        debug!("Abandoned soffice process {} killed on drop", pgid);
    }
}

/// `file://` URL for a local absolute path, as LibreOffice expects for
/// `-env:UserInstallation`.
fn file_url(path: &Path) -> String {
    let s = path
        .to_string_lossy()
        .replace('\\', "/")
        .replace(' ', "%20");
    if s.starts_with('/') {
        format!("file://{}", s)
    } else {
        format!("file:///{}", s)
    }
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "(no stderr)".to_string();
    }
    if text.chars().count() > MAX_STDERR_CHARS {
        let cut: String = text.chars().take(MAX_STDERR_CHARS).collect();
        format!("{}\u{2026}", cut)
    } else {
        text.to_string()
    }
}
