//! # edgequake-docx2pdf
//!
//! Upload a Word document over HTTP, get a PDF back.
//!
//! ## Why this crate?
//!
//! Converting DOCX faithfully means running LibreOffice, and LibreOffice is a
//! poor neighbour: it keeps a shared user profile, it hangs on some inputs
//! and it leaves files behind when the caller gives up. This crate wraps it
//! in a small service that owns those problems: one isolated profile per
//! conversion, a bounded number of conversions at once, a hard timeout, and
//! temporary files that are gone when the request is.
//!
//! ## Pipeline Overview
//!
//! ```text
//! POST /convertFile (multipart, field "file")
//!  │
//!  ├─ 1. Input     pull the file part, refuse bad types / sizes early
//!  ├─ 2. Validate  media type + extension + size cap
//!  ├─ 3. Store     upload/{ms}-{token}-{name}.docx
//!  ├─ 4. Convert   soffice --headless (or a Gotenberg sidecar), timeout-bound
//!  ├─ 5. Write     files/{ms}-{token}-{name}.pdf
//!  ├─ 6. Stream    200 application/pdf, Content-Disposition: attachment
//!  └─ 7. Cleanup   both files removed when the body ends or is dropped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docx2pdf::{server, shutdown_signal, ProcessGuard, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder().port(3000).build()?;
//!     let guard = ProcessGuard::new();
//!     let server = server::bind(&config, guard).await?;
//!     server.run(shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docx2pdf` binary (clap + anyhow + tracing-subscriber + dotenv) |
//!
//! Disable `cli` when embedding the router in another axum application:
//! ```toml
//! edgequake-docx2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing an Engine
//!
//! | Engine | Needs | Best for |
//! |--------|-------|----------|
//! | `soffice` | LibreOffice installed on the host | Single container, default |
//! | `remote`  | A Gotenberg-compatible URL | Conversion isolated in a sidecar |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod guard;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, ServerConfig, ServerConfigBuilder};
pub use convert::Converter;
pub use engine::{build_engine, ConversionEngine, RemoteEngine, SofficeEngine};
pub use error::{DocxError, EngineError, ErrorBody, ErrorKind};
pub use guard::{shutdown_signal, ProcessGuard};
pub use output::{ConversionOutput, ConversionStats};
pub use pipeline::input::UploadRequest;
pub use server::{build_router, AppState};
