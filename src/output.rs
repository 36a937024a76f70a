//! Result types produced by the conversion orchestrator.

use crate::pipeline::stage::StageTracker;
use crate::storage::RequestFiles;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Timing and size figures for one conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// Name of the engine that produced the PDF.
    pub engine: String,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Time spent inside the engine, including the wait for a conversion slot.
    pub conversion_ms: u64,
    /// Time from validation to the artifact being on disk.
    pub total_ms: u64,
}

/// A converted document, persisted and ready to be streamed.
///
/// Owns the request's temporary files: dropping it without handing it to
/// [`crate::stream::DeliveryStream::open`] removes both files.
#[derive(Debug)]
pub struct ConversionOutput {
    pub request_id: Uuid,
    /// Filename offered to the client in `Content-Disposition`.
    pub download_name: String,
    pub stats: ConversionStats,
    pub(crate) artifact_path: PathBuf,
    pub(crate) files: RequestFiles,
    pub(crate) tracker: StageTracker,
}

impl ConversionOutput {
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Path of the StoredUpload this artifact was converted from.
    pub fn upload_path(&self) -> Option<&Path> {
        self.files.upload()
    }
}
