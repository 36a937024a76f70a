//! Input extraction: turn a multipart request body into an [`UploadRequest`].
//!
//! Only the part named `file` is considered; any other part is skipped. The
//! declared type is checked as soon as the part headers arrive and the size
//! is checked after every chunk, so neither a wrong-type upload nor an
//! oversized one is ever buffered in full.

use crate::error::DocxError;
use crate::pipeline::validate::{UploadMeta, UploadValidator};
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use tracing::debug;

/// Name of the multipart field carrying the document.
pub const FILE_FIELD: &str = "file";

/// One uploaded document, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Filename as sent by the client, before normalisation.
    pub filename: String,
    /// Declared `Content-Type` of the part, if any.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, media_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            media_type: media_type.map(str::to_string),
            bytes,
        }
    }

    pub fn meta(&self) -> UploadMeta<'_> {
        UploadMeta {
            filename: &self.filename,
            media_type: self.media_type.as_deref(),
            size: self.bytes.len() as u64,
        }
    }
}

/// Read the `file` part of `multipart`.
///
/// Returns `Ok(None)` when the body has no `file` part, or the part carries
/// no filename (a plain text field named `file`).
pub async fn read_upload(
    multipart: &mut Multipart,
    validator: &UploadValidator,
) -> Result<Option<UploadRequest>, DocxError> {
    let limit = validator.max_bytes();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let filename = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                debug!("'{}' field has no filename", FILE_FIELD);
                return Ok(None);
            }
        };
        let media_type = field.content_type().map(str::to_string);
        validator.check_declared(&filename, media_type.as_deref())?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, limit))?
        {
            validator.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        debug!("Read upload '{}' ({} bytes)", filename, bytes.len());
        return Ok(Some(UploadRequest {
            filename,
            media_type,
            bytes,
        }));
    }

    Ok(None)
}

/// The body-limit layer surfaces as a 413 multipart error; report it as the
/// same `TooLarge` the validator would.
fn multipart_error(e: MultipartError, limit: u64) -> DocxError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocxError::TooLarge { limit }
    } else {
        DocxError::ReadError {
            detail: e.body_text(),
        }
    }
}
