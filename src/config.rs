//! Configuration types for the DOCX-to-PDF server.
//!
//! All server behaviour is controlled through [`ServerConfig`], built via its
//! [`ServerConfigBuilder`]. Directory paths live here rather than in globals so
//! tests can point each server instance at its own scratch directories.

use crate::error::DocxError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::lookup_host;

/// Declared media type of the one accepted source format.
pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extension (without the dot) of the accepted source format.
pub const DOCX_EXTENSION: &str = "docx";

/// Media type of the produced artifact.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Extension (without the dot) of the produced artifact.
pub const PDF_EXTENSION: &str = "pdf";

/// Default upload cap: 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Server configuration.
///
/// Built via [`ServerConfig::builder()`] or using [`ServerConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docx2pdf::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::builder()
///     .upload_dir("/var/tmp/docx2pdf/upload")
///     .output_dir("/var/tmp/docx2pdf/files")
///     .port(8080)
///     .conversion_timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory that receives StoredUploads. Default: `./upload`.
    pub upload_dir: PathBuf,

    /// Directory that receives ConvertedArtifacts. Default: `./files`.
    pub output_dir: PathBuf,

    /// Bind address. Default: `0.0.0.0`.
    pub host: String,

    /// Listening port. Default: 3000.
    pub port: u16,

    /// Maximum accepted upload size in bytes. Default: 5 MiB.
    pub max_upload_bytes: u64,

    /// Upper bound on a single engine invocation. Default: 60 s.
    ///
    /// Expiry is reported as `ConversionFailed` and the request's temporary
    /// files are removed like on any other failure.
    pub conversion_timeout: Duration,

    /// Engine invocations allowed to run at once. Default: 4.
    ///
    /// Each LibreOffice process holds a few hundred MB while rendering; the
    /// semaphore keeps a burst of uploads from exhausting memory. Requests
    /// beyond the limit wait their turn; the wait counts against
    /// `conversion_timeout`.
    pub max_concurrent_conversions: usize,

    /// Files older than this found in either directory at startup are
    /// treated as orphans and deleted. Default: 1 h.
    pub stale_file_age: Duration,

    /// Which conversion engine to drive. Default: local `soffice`.
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            output_dir: PathBuf::from("files"),
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            conversion_timeout: Duration::from_secs(60),
            max_concurrent_conversions: 4,
            stale_file_age: Duration::from_secs(3600),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve `host:port` into a socket address.
    ///
    /// IP literals (`0.0.0.0`, `::`, `[::1]`) are used as-is; anything else
    /// is looked up and the first address returned wins.
    pub async fn bind_addr(&self) -> Result<SocketAddr, DocxError> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let cannot_bind = |reason: String| {
            DocxError::InvalidConfig(format!(
                "cannot bind to {}:{}: {}",
                self.host, self.port, reason
            ))
        };
        lookup_host((host, self.port))
            .await
            .map_err(|e| cannot_bind(e.to_string()))?
            .next()
            .ok_or_else(|| cannot_bind("host resolved to no addresses".into()))
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
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

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.config.conversion_timeout = timeout;
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n;
        self
    }

    pub fn stale_file_age(mut self, age: Duration) -> Self {
        self.config.stale_file_age = age;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, DocxError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(DocxError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.conversion_timeout.is_zero() {
            return Err(DocxError::InvalidConfig(
                "conversion_timeout must be non-zero".into(),
            ));
        }
        if c.max_concurrent_conversions == 0 {
            return Err(DocxError::InvalidConfig(
                "max_concurrent_conversions must be ≥ 1".into(),
            ));
        }
        if c.upload_dir == c.output_dir {
            return Err(DocxError::InvalidConfig(format!(
                "upload_dir and output_dir must differ (both are '{}')",
                c.upload_dir.display()
            )));
        }
        if let EngineConfig::Remote { url } = &c.engine {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(DocxError::InvalidConfig(format!(
                    "remote engine URL must be http(s), got '{}'",
                    url
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which conversion backend the server drives.
///
/// Both produce the same contract (DOCX bytes in, PDF bytes out); pick the
/// local binary when LibreOffice is installed next to the server, or the
/// remote service when conversion runs in a sidecar container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineConfig {
    /// Spawn a headless LibreOffice per conversion.
    Soffice {
        /// Path or name of the `soffice` executable.
        binary: PathBuf,
    },
    /// POST to a Gotenberg-compatible conversion service.
    Remote {
        /// Base URL, e.g. `http://gotenberg:3000`.
        url: String,
    },
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Soffice {
            binary: PathBuf::from("soffice"),
        }
    }
}
