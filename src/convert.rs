//! Conversion orchestrator: one upload in, one persisted PDF out.
//!
//! [`Converter::convert`] walks a request through
//! `Received → Validated → Stored → Converting → Converted → Delivering`.
//! The returned [`ConversionOutput`] owns both temporary files; the last
//! transition to `CleanedUp` happens in [`crate::stream::DeliveryStream`]
//! once the body has been sent.
//!
//! Every failure after the upload reached the disk removes whatever the
//! request wrote before the error is returned, so an error response never
//! leaves files behind.
//!
//! Conversions run behind a semaphore sized by
//! [`ServerConfig::max_concurrent_conversions`] and under
//! [`ServerConfig::conversion_timeout`]. The timeout covers the wait for a
//! slot as well as the engine call itself.

use crate::config::ServerConfig;
use crate::engine::{build_engine, ConversionEngine};
use crate::error::{DocxError, EngineError};
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::input::UploadRequest;
use crate::pipeline::stage::{Stage, StageTracker};
use crate::pipeline::validate::UploadValidator;
use crate::storage::{generate_upload_name, RequestFiles, StoragePaths};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs uploads through validation, storage and the conversion engine.
pub struct Converter {
    storage: StoragePaths,
    validator: UploadValidator,
    engine: Arc<dyn ConversionEngine>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Converter {
    /// Build a converter from `config`, creating the storage directories and
    /// the configured engine.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, DocxError> {
        let engine = build_engine(&config.engine, config.conversion_timeout)?;
        Self::with_engine(config, engine).await
    }

    /// Same as [`from_config`](Self::from_config) with an explicit engine.
    pub async fn with_engine(
        config: &ServerConfig,
        engine: Arc<dyn ConversionEngine>,
    ) -> Result<Self, DocxError> {
        let storage =
            StoragePaths::ensure(config.upload_dir.clone(), config.output_dir.clone()).await?;
        info!(
            "Converter ready: engine={}, timeout={:?}, max_concurrent={}",
            engine.name(),
            config.conversion_timeout,
            config.max_concurrent_conversions
        );
        Ok(Self {
            storage,
            validator: UploadValidator::new(config.max_upload_bytes),
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrent_conversions)),
            timeout: config.conversion_timeout,
        })
    }

    pub fn storage(&self) -> &StoragePaths {
        &self.storage
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Convert one upload.
    ///
    /// `None` means the request carried no usable file part.
    ///
    /// # Errors
    /// * `NoFile`, `UnsupportedType`, `TooLarge` — rejected before anything
    ///   was written
    /// * `WriteFailed` — the upload or the artifact could not be persisted
    /// * `ConversionFailed` — the engine failed, returned a non-PDF, or ran
    ///   past the timeout
    pub async fn convert(
        &self,
        upload: Option<UploadRequest>,
    ) -> Result<ConversionOutput, DocxError> {
        self.convert_tracked(StageTracker::new(Uuid::new_v4()), upload)
            .await
    }

    /// [`convert`](Self::convert) for a request whose tracker was created
    /// while its body was still being read.
    pub async fn convert_tracked(
        &self,
        mut tracker: StageTracker,
        upload: Option<UploadRequest>,
    ) -> Result<ConversionOutput, DocxError> {
        let total_start = Instant::now();
        let request_id = tracker.request_id();

        // ── Step 1: Validate ─────────────────────────────────────────────
        let upload = match upload {
            Some(upload) => upload,
            None => return Err(tracker.reject(DocxError::NoFile)),
        };
        if let Err(e) = self.validator.check(&upload.meta()) {
            return Err(tracker.reject(e));
        }
        tracker.advance(Stage::Validated);

        // ── Step 2: Store the upload ─────────────────────────────────────
        let name = generate_upload_name(&upload.filename);
        let upload_path = self.storage.upload_path(&name);
        let artifact_path = self.storage.artifact_path(&name);
        info!(
            request_id = %request_id,
            "Converting '{}' ({} bytes) as {}",
            upload.filename,
            upload.bytes.len(),
            name
        );

        let mut files = RequestFiles::new();
        files.track_upload(upload_path.clone());
        if let Err(e) = tokio::fs::write(&upload_path, &upload.bytes).await {
            let err = DocxError::WriteFailed {
                path: upload_path,
                source: e,
            };
            return Err(fail(tracker, files, err).await);
        }
        tracker.advance(Stage::Stored);

        // ── Step 3: Run the engine ───────────────────────────────────────
        tracker.advance(Stage::Converting);
        let input_bytes = upload.bytes.len() as u64;
        let engine_start = Instant::now();
        let pdf = match self.run_engine(upload.bytes).await {
            Ok(pdf) => pdf,
            Err(source) => {
                let err = DocxError::ConversionFailed {
                    engine: self.engine.name().to_string(),
                    source,
                };
                return Err(fail(tracker, files, err).await);
            }
        };
        let conversion_ms = engine_start.elapsed().as_millis() as u64;
        tracker.advance(Stage::Converted);

        // ── Step 4: Persist the artifact ─────────────────────────────────
        files.track_artifact(artifact_path.clone());
        if let Err(e) = tokio::fs::write(&artifact_path, &pdf).await {
            let err = DocxError::WriteFailed {
                path: artifact_path,
                source: e,
            };
            return Err(fail(tracker, files, err).await);
        }
        tracker.advance(Stage::Delivering);

        let download_name = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", request_id));
        let stats = ConversionStats {
            engine: self.engine.name().to_string(),
            input_bytes,
            output_bytes: pdf.len() as u64,
            conversion_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            request_id = %request_id,
            "Converted {} bytes into {} bytes in {}ms",
            stats.input_bytes,
            stats.output_bytes,
            stats.conversion_ms
        );

        Ok(ConversionOutput {
            request_id,
            download_name,
            stats,
            artifact_path,
            files,
            tracker,
        })
    }

    /// Call the engine inside a concurrency slot, bounded by the timeout.
    async fn run_engine(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| EngineError::Unavailable("conversion slots closed".to_string()))?;
            debug!(
                "Conversion slot acquired ({} free)",
                self.permits.available_permits()
            );
            self.engine.convert(input).await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Mark the request failed and remove whatever it wrote.
async fn fail(mut tracker: StageTracker, files: RequestFiles, err: DocxError) -> DocxError {
    warn!(request_id = %tracker.request_id(), "{} failed: {}", tracker.stage(), err);
    tracker.advance(Stage::Failed);
    let removed = files.cleanup().await;
    debug!(request_id = %tracker.request_id(), "Removed {} file(s) after failure", removed);
    err
}
