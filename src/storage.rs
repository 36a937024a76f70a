//! Storage paths: where StoredUploads and ConvertedArtifacts live, how they
//! are named, and how they are removed.
//!
//! ## Naming
//!
//! Every request gets a name of the form `{unix_ms}-{token}-{original}` where
//! `original` is the client's filename reduced to its last path component with
//! whitespace runs replaced by `_`. The millisecond prefix keeps directory
//! listings in arrival order; the random token makes two same-named uploads in
//! the same millisecond distinct. Because names never repeat, the two
//! directories need no locking: each request only ever touches its own files.
//!
//! ## Cleanup
//!
//! [`RequestFiles`] records which files a request has created. Its
//! [`RequestFiles::cleanup`] is awaited on every terminal path; its `Drop`
//! removes anything still recorded, which covers a request future that is
//! cancelled mid-pipeline (client disconnect during conversion).

use crate::config::PDF_EXTENSION;
use crate::error::DocxError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Fallback when the client sends a filename with nothing usable in it.
const FALLBACK_NAME: &str = "upload.docx";

/// The two directories owned by the server.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl StoragePaths {
    /// Create both directories if absent and return the handle.
    pub async fn ensure(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, DocxError> {
        let paths = Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        };
        for dir in [&paths.upload_dir, &paths.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DocxError::WriteFailed {
                    path: dir.clone(),
                    source: e,
                })?;
            debug!("Storage directory ready: {}", dir.display());
        }
        Ok(paths)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of a StoredUpload with the given generated name.
    pub fn upload_path(&self, generated_name: &str) -> PathBuf {
        self.upload_dir.join(generated_name)
    }

    /// Path of the ConvertedArtifact belonging to `generated_name`: same
    /// stem, `.pdf` extension, output directory.
    pub fn artifact_path(&self, generated_name: &str) -> PathBuf {
        let stem = Path::new(generated_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| generated_name.to_string());
        self.output_dir.join(format!("{}.{}", stem, PDF_EXTENSION))
    }

    /// Delete regular files older than `max_age` from both directories.
    ///
    /// Returns the number of files removed. Subdirectories are left alone.
    pub async fn sweep_stale(&self, max_age: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for dir in [&self.upload_dir, &self.output_dir] {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Skipping {}: {}", entry.path().display(), e);
                        continue;
                    }
                };
                if !meta.is_file() {
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age >= max_age && remove_file_logged(&entry.path()).await {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Swept {} stale file(s) older than {:?}", removed, max_age);
        }
        Ok(removed)
    }
}

/// Build a collision-free, path-safe name for an upload.
pub fn generate_upload_name(original: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", millis, &token[..8], normalize_filename(original))
}

/// Reduce a client filename to a safe single path component.
///
/// Directory parts (either separator) are dropped, whitespace runs become
/// `_`, and control characters are removed.
pub fn normalize_filename(original: &str) -> String {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = WHITESPACE.replace_all(cleaned.trim(), "_").into_owned();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Remove a file, logging anything other than "already gone".
///
/// Returns `true` if a file was actually deleted.
pub async fn remove_file_logged(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}

fn remove_file_logged_blocking(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}

/// The temporary files one request has created.
#[derive(Debug, Default)]
pub struct RequestFiles {
    upload: Option<PathBuf>,
    artifact: Option<PathBuf>,
}

impl RequestFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the StoredUpload path. Called *before* the write starts so a
    /// partially written file is still removed.
    pub fn track_upload(&mut self, path: PathBuf) {
        debug_assert!(self.upload.is_none(), "one StoredUpload per request");
        self.upload = Some(path);
    }

    /// Record the ConvertedArtifact path, before the write starts.
    pub fn track_artifact(&mut self, path: PathBuf) {
        debug_assert!(self.artifact.is_none(), "one ConvertedArtifact per request");
        self.artifact = Some(path);
    }

    pub fn upload(&self) -> Option<&Path> {
        self.upload.as_deref()
    }

    /// Delete every tracked file. Deletion failures are logged, never
    /// returned: they must not replace the response the caller is about to
    /// send. Returns how many files were removed.
    ///
    /// A path stays tracked until its unlink has finished, so dropping this
    /// future part-way leaves the rest to `Drop`.
    pub async fn cleanup(mut self) -> usize {
        let mut removed = 0;
        for slot in [&mut self.upload, &mut self.artifact] {
            if let Some(path) = slot.as_deref() {
                if remove_file_logged(path).await {
                    removed += 1;
                }
            }
            *slot = None;
        }
        removed
    }

    fn take_paths(&mut self) -> Vec<PathBuf> {
        [self.upload.take(), self.artifact.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl Drop for RequestFiles {
    fn drop(&mut self) {
        // Only finds paths when `cleanup` was skipped, i.e. the owning future
        // was dropped or a panic unwound through it.
        let paths = self.take_paths();
        if paths.is_empty() {
            return;
        }
        debug!("Removing {} request file(s) on drop", paths.len());
        let remove_all = move || {
            paths
                .iter()
                .filter(|path| remove_file_logged_blocking(path))
                .count()
        };
        // Unlinks go to the blocking pool; without a runtime they run here.
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove_all);
            }
            Err(_) => {
                remove_all();
            }
        }
    }
}
