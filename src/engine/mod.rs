//! Conversion engine adapters.
//!
//! The server does not render documents itself. It hands the uploaded bytes
//! to an external engine through the [`ConversionEngine`] trait and gets PDF
//! bytes back. Two implementations ship with the crate:
//!
//! | Engine | Backend | When to use |
//! |--------|---------|-------------|
//! | [`SofficeEngine`] | headless LibreOffice child process | LibreOffice installed on the host |
//! | [`RemoteEngine`]  | Gotenberg-compatible HTTP service  | conversion runs in a sidecar |
//!
//! Adapters report every failure as one [`EngineError`] and never retry;
//! retries are the caller's business. Each call must be independent of any
//! other concurrent call.

mod remote;
mod soffice;

pub use remote::RemoteEngine;
pub use soffice::SofficeEngine;

use crate::config::EngineConfig;
use crate::error::{DocxError, EngineError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Magic bytes every PDF starts with.
const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// DOCX bytes in, PDF bytes out.
///
/// Implementations must be safe to call concurrently from many requests.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Short engine name for logs and error messages.
    fn name(&self) -> &str;

    /// Convert one document.
    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError>;
}

/// Instantiate the engine described by `config`.
///
/// `timeout` is passed to engines that have their own transport timeout
/// (the remote client); the orchestrator enforces it for all engines too.
pub fn build_engine(
    config: &EngineConfig,
    timeout: Duration,
) -> Result<Arc<dyn ConversionEngine>, DocxError> {
    match config {
        EngineConfig::Soffice { binary } => {
            let engine = SofficeEngine::new(binary.clone());
            info!("Conversion engine: soffice at {}", engine.binary().display());
            Ok(Arc::new(engine))
        }
        EngineConfig::Remote { url } => {
            let engine = RemoteEngine::new(url, timeout).map_err(|e| {
                DocxError::InvalidConfig(format!("remote engine '{}': {}", url, e))
            })?;
            info!("Conversion engine: remote at {}", engine.endpoint());
            Ok(Arc::new(engine))
        }
    }
}

/// Accept `bytes` only if they look like a PDF.
pub(crate) fn ensure_pdf(bytes: Vec<u8>) -> Result<Vec<u8>, EngineError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(bytes)
    } else {
        Err(EngineError::InvalidOutput {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        })
    }
}
