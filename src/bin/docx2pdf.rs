//! Server binary for edgequake-docx2pdf.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ServerConfig`, installs logging and the process guard, and
//! runs the HTTP server until Ctrl+C / SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docx2pdf::{server, shutdown_signal, EngineConfig, ProcessGuard, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "edgequake_docx2pdf=info,tower_http=info";

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local LibreOffice (soffice on PATH)
  docx2pdf --port 3000

  # Remote Gotenberg sidecar
  docx2pdf --engine remote --engine-url http://gotenberg:3000

  # Convert a document
  curl -F "file=@report.docx" http://localhost:3000/convertFile -o report.pdf

ENVIRONMENT:
  Every flag can be set through the variable shown in its help text. A .env
  file in the working directory is loaded first. RUST_LOG overrides the log
  filter (default: edgequake_docx2pdf=info,tower_http=info).
"#;

/// Convert uploaded DOCX documents to PDF over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "docx2pdf",
    version,
    about = "Convert uploaded DOCX documents to PDF over HTTP",
    long_about = "HTTP service that accepts a DOCX upload on POST /convertFile, converts it \
with headless LibreOffice (or a Gotenberg-compatible service) and streams the PDF back. \
Temporary files are removed as soon as each request finishes.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind: an IP address (`0.0.0.0`, `::`) or a host name.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Directory for StoredUploads.
    #[arg(long, env = "UPLOAD_DIR", default_value = "upload")]
    upload_dir: PathBuf,

    /// Directory for ConvertedArtifacts.
    #[arg(long, env = "OUTPUT_DIR", default_value = "files")]
    output_dir: PathBuf,

    /// Maximum accepted upload size in bytes.
    #[arg(long, env = "DOCX2PDF_MAX_UPLOAD_BYTES", default_value_t = 5 * 1024 * 1024)]
    max_upload_bytes: u64,

    /// Seconds a single conversion may take before it is abandoned.
    #[arg(long, env = "DOCX2PDF_CONVERSION_TIMEOUT", default_value_t = 60)]
    conversion_timeout: u64,

    /// Conversions allowed to run at the same time.
    #[arg(long, env = "DOCX2PDF_MAX_CONCURRENT", default_value_t = 4)]
    max_concurrent_conversions: usize,

    /// Files older than this many seconds are removed at startup.
    #[arg(long, env = "DOCX2PDF_STALE_FILE_AGE", default_value_t = 3600)]
    stale_file_age: u64,

    /// Conversion backend.
    #[arg(long, env = "DOCX2PDF_ENGINE", value_enum, default_value = "soffice")]
    engine: EngineArg,

    /// LibreOffice executable used by the `soffice` engine.
    #[arg(long, env = "DOCX2PDF_SOFFICE_PATH", default_value = "soffice")]
    soffice_path: PathBuf,

    /// Base URL of the conversion service used by the `remote` engine.
    #[arg(long, env = "DOCX2PDF_ENGINE_URL")]
    engine_url: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,

    /// Debug-level logging.
    #[arg(short, long, env = "DOCX2PDF_VERBOSE")]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum EngineArg {
    Soffice,
    Remote,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        match self.engine {
            EngineArg::Soffice => Ok(EngineConfig::Soffice {
                binary: self.soffice_path.clone(),
            }),
            EngineArg::Remote => {
                let url = self
                    .engine_url
                    .clone()
                    .context("--engine remote requires --engine-url (or DOCX2PDF_ENGINE_URL)")?;
                Ok(EngineConfig::Remote { url })
            }
        }
    }

    fn to_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig::builder()
            .host(self.host.clone())
            .port(self.port)
            .upload_dir(self.upload_dir.clone())
            .output_dir(self.output_dir.clone())
            .max_upload_bytes(self.max_upload_bytes)
            .conversion_timeout(Duration::from_secs(self.conversion_timeout))
            .max_concurrent_conversions(self.max_concurrent_conversions)
            .stale_file_age(Duration::from_secs(self.stale_file_age))
            .engine(self.engine_config()?)
            .build()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { DEFAULT_FILTER };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.to_config().context("Invalid configuration")?;
    config.bind_addr().await.context("Invalid configuration")?;
    tracing::debug!("{:?}", config);

    if cli.check_config {
        println!("Configuration is valid.");
        return Ok(());
    }

    // ── Process guard ────────────────────────────────────────────────────
    let guard = ProcessGuard::new();
    guard.install_panic_hook();

    // ── Serve ────────────────────────────────────────────────────────────
    let server = server::bind(&config, Arc::clone(&guard))
        .await
        .context("Failed to start server")?;
    info!(
        "Server running on port {} (uploads: {}, output: {})",
        server.local_addr().port(),
        config.upload_dir.display(),
        config.output_dir.display()
    );

    match tokio::spawn(server.run(shutdown_signal())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => guard.terminate(&e),
        Err(join) => guard.terminate(&join),
    }
}
