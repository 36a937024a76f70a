//! Error types for the edgequake-docx2pdf library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`DocxError`] — **Request-fatal**: the upload cannot be turned into a
//!   PDF (bad input, storage failure, engine failure). Every variant maps to
//!   exactly one wire-level [`ErrorKind`] and one HTTP status.
//!
//! * [`EngineError`] — **Adapter-level**: what went wrong inside a
//!   [`crate::engine::ConversionEngine`]. Callers never see it on the wire;
//!   the orchestrator wraps it in [`DocxError::ConversionFailed`] and logs
//!   the detail.
//!
//! Client responses carry a fixed, human-readable message per kind. Paths,
//! engine stderr and I/O causes go to the logs only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Wire-level failure tag, serialised verbatim into the `error` field of the
/// JSON error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request carried no usable `file` part.
    NoFile,
    /// Declared media type or extension is not DOCX.
    UnsupportedType,
    /// The upload exceeded the configured size cap.
    TooLarge,
    /// The request body could not be read.
    ReadError,
    /// A temporary file could not be written.
    WriteFailed,
    /// The conversion engine failed or timed out.
    ConversionFailed,
    /// A handler panicked; caught by the process guard.
    InternalError,
}

impl ErrorKind {
    /// `true` for faults the client caused and can fix by resubmitting
    /// different input.
    pub fn is_client_error(self) -> bool {
        matches!(self, Self::NoFile | Self::UnsupportedType | Self::TooLarge)
    }

    pub fn status_code(self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFile => "NoFile",
            Self::UnsupportedType => "UnsupportedType",
            Self::TooLarge => "TooLarge",
            Self::ReadError => "ReadError",
            Self::WriteFailed => "WriteFailed",
            Self::ConversionFailed => "ConversionFailed",
            Self::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body returned for every failed request.
///
/// ```json
/// { "success": false, "error": "ConversionFailed", "message": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: kind,
            message: message.into(),
        }
    }
}

/// All request-fatal errors returned by the edgequake-docx2pdf library.
#[derive(Debug, Error)]
pub enum DocxError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// No `file` part, an empty part, or a part without a filename.
    #[error("No valid file uploaded")]
    NoFile,

    /// The declared media type or the extension is not DOCX.
    #[error("Unsupported upload '{filename}' (declared type {media_type:?})")]
    UnsupportedType {
        filename: String,
        media_type: Option<String>,
    },

    /// The upload crossed the size cap.
    #[error("Upload exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    // ── Server errors ─────────────────────────────────────────────────────
    /// The multipart body could not be read to completion.
    #[error("Failed to read upload body: {detail}")]
    ReadError { detail: String },

    /// A StoredUpload or ConvertedArtifact could not be written.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine failed, produced garbage, or ran past the timeout.
    #[error("Conversion with engine '{engine}' failed: {source}")]
    ConversionFailed {
        engine: String,
        #[source]
        source: EngineError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFile => ErrorKind::NoFile,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::ReadError { .. } => ErrorKind::ReadError,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            Self::InvalidConfig(_) | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Message safe to hand back to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::NoFile => "No valid file uploaded".to_string(),
            Self::UnsupportedType { .. } => "Only .docx files are allowed".to_string(),
            Self::TooLarge { limit } => format!(
                "File exceeds the maximum upload size of {}",
                human_bytes(*limit)
            ),
            Self::ReadError { .. } => {
                "The upload could not be read. Please try again.".to_string()
            }
            Self::WriteFailed { .. } => {
                "The server could not store the file. Please try again later.".to_string()
            }
            Self::ConversionFailed { .. } => {
                "Error converting DOCX to PDF. Please try again later.".to_string()
            }
            Self::InvalidConfig(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.public_message())
    }
}

impl IntoResponse for DocxError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind.is_client_error() {
            tracing::debug!("Client error: {}", self);
        } else {
            tracing::error!("Request failed: {}", self);
        }
        (kind.status_code(), Json(self.to_body())).into_response()
    }
}

/// A failure inside a conversion engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be reached or started at all.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran but reported failure.
    #[error("engine failed: {0}")]
    Failed(String),

    /// The engine returned something that is not a PDF.
    #[error("engine returned a non-PDF payload (first bytes: {magic:?})")]
    InvalidOutput { magic: Vec<u8> },

    /// The conversion did not finish in time.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Local scratch I/O around the engine invocation failed.
    #[error("engine scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn human_bytes(n: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;
    if n >= MIB && n % MIB == 0 {
        format!("{} MB", n / MIB)
    } else if n >= KIB && n % KIB == 0 {
        format!("{} KB", n / KIB)
    } else {
        format!("{} bytes", n)
    }
}
