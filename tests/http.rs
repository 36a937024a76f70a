//! HTTP-level tests for `POST /convertFile` and `GET /health`.
//!
//! The router is driven in-process through `axum-test` with mock engines, so
//! these run everywhere without LibreOffice. Every test gets its own scratch
//! directories and asserts on what is left in them afterwards.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use edgequake_docx2pdf::config::{DOCX_MEDIA_TYPE, PDF_MEDIA_TYPE};
use edgequake_docx2pdf::{
    build_router, AppState, ConversionEngine, Converter, EngineError, ErrorBody, ErrorKind,
    ProcessGuard, ServerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;
use tracing_subscriber::EnvFilter;

// ── Mock engines ─────────────────────────────────────────────────────────────

/// Returns the input behind a PDF header, so each response can be matched to
/// its upload.
struct EchoEngine;

#[async_trait]
impl ConversionEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.extend_from_slice(&input);
        Ok(pdf)
    }
}

struct FailingEngine;

#[async_trait]
impl ConversionEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn convert(&self, _input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Failed("exit status 1: source file could not be loaded".into()))
    }
}

struct HangingEngine;

#[async_trait]
impl ConversionEngine for HangingEngine {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn convert(&self, _input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(b"%PDF-too-late".to_vec())
    }
}

/// Panics on inputs starting with `boom`, echoes everything else.
struct PanickyEngine;

#[async_trait]
impl ConversionEngine for PanickyEngine {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        if input.starts_with(b"boom") {
            panic!("engine blew up");
        }
        EchoEngine.convert(input).await
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows stage
/// transitions for a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    _tmp: TempDir,
    server: TestServer,
    guard: Arc<ProcessGuard>,
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl Harness {
    async fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let upload_dir = tmp.path().join("upload");
        let output_dir = tmp.path().join("files");
        let config = ServerConfig::builder()
            .upload_dir(&upload_dir)
            .output_dir(&output_dir)
            .conversion_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let converter = Arc::new(assert_ok!(Converter::with_engine(&config, engine).await));
        let guard = ProcessGuard::new();
        let router = build_router(AppState {
            converter,
            guard: Arc::clone(&guard),
        });
        Self {
            _tmp: tmp,
            server: TestServer::new(router).unwrap(),
            guard,
            upload_dir,
            output_dir,
        }
    }

    /// Files still on disk, after giving drop-time cleanup (a request
    /// unwound by a panic) a moment on the blocking pool.
    async fn leftover_files(&self) -> usize {
        let count = || count_files(&self.upload_dir) + count_files(&self.output_dir);
        for _ in 0..100 {
            if count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        count()
    }
}

fn count_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

fn docx_form(filename: &str, body: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(body).file_name(filename).mime_type(DOCX_MEDIA_TYPE),
    )
}

fn sample_docx() -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/sample.docx");
    std::fs::read(path).unwrap()
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok_with_security_headers() {
    let h = Harness::new(Arc::new(EchoEngine)).await;

    let resp = h.server.get("/health").await;
    resp.assert_status_ok();
    resp.assert_json(&serde_json::json!({ "status": "OK" }));
    assert_eq!(resp.header("x-content-type-options"), "nosniff");
    assert_eq!(resp.header("x-frame-options"), "DENY");
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_document_returns_pdf_and_leaves_nothing_behind() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    let docx = sample_docx();

    let resp = h
        .server
        .post("/convertFile")
        .multipart(docx_form("Quarterly Report.docx", docx.clone()))
        .await;

    resp.assert_status_ok();
    assert_eq!(resp.header("content-type"), PDF_MEDIA_TYPE);
    let disposition = resp.header("content-disposition");
    let disposition = disposition.to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\""), "{disposition}");
    assert!(disposition.ends_with("-Quarterly_Report.pdf\""), "{disposition}");

    let body = resp.as_bytes();
    assert!(body.starts_with(b"%PDF"));
    assert_eq!(body.len(), docx.len() + b"%PDF-1.4\n".len());
    assert_eq!(resp.header("content-length"), body.len().to_string().as_str());

    assert_eq!(h.leftover_files().await, 0);
}

#[tokio::test]
async fn extension_and_media_type_are_case_insensitive() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"PK\x03\x04".to_vec())
            .file_name("SHOUTING.DOCX")
            .mime_type(DOCX_MEDIA_TYPE.to_uppercase().as_str()),
    );

    h.server.post("/convertFile").multipart(form).await.assert_status_ok();
    assert_eq!(h.leftover_files().await, 0);
}

#[tokio::test]
async fn concurrent_uploads_do_not_interfere() {
    let h = Harness::new(Arc::new(EchoEngine)).await;

    let requests = (0..8).map(|i| {
        let server = &h.server;
        async move {
            let body = format!("PK document number {i}").into_bytes();
            let resp = server
                .post("/convertFile")
                .multipart(docx_form("same-name.docx", body.clone()))
                .await;
            (i, body, resp)
        }
    });
    let responses = futures::future::join_all(requests).await;

    let mut names = Vec::new();
    for (i, body, resp) in responses {
        resp.assert_status_ok();
        let pdf = resp.as_bytes();
        assert!(pdf.ends_with(&body), "response {i} carries another request's content");
        names.push(resp.header("content-disposition").to_str().unwrap().to_string());
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 8, "download names collided");
    assert_eq!(h.leftover_files().await, 0);
}

// ── Rejections ───────────────────────────────────────────────────────────────

async fn assert_rejected(h: &Harness, resp: axum_test::TestResponse, kind: ErrorKind) {
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = resp.json();
    assert!(!body.success);
    assert_eq!(body.error, kind);
    assert!(!body.message.is_empty());
    assert_eq!(h.leftover_files().await, 0);
}

#[tokio::test]
async fn oversized_upload_is_too_large() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    let six_mib = vec![b'x'; 6 * 1024 * 1024];

    let resp = h.server.post("/convertFile").multipart(docx_form("big.docx", six_mib)).await;

    assert_rejected(&h, resp, ErrorKind::TooLarge).await;
}

#[tokio::test]
async fn wrong_extension_is_unsupported() {
    let h = Harness::new(Arc::new(EchoEngine)).await;

    let resp = h
        .server
        .post("/convertFile")
        .multipart(docx_form("notes.txt", b"plain text".to_vec()))
        .await;

    assert_rejected(&h, resp, ErrorKind::UnsupportedType).await;
}

#[tokio::test]
async fn wrong_media_type_is_unsupported() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"%PDF-1.4".to_vec())
            .file_name("sneaky.docx")
            .mime_type("application/pdf"),
    );

    let resp = h.server.post("/convertFile").multipart(form).await;

    assert_rejected(&h, resp, ErrorKind::UnsupportedType).await;
}

#[tokio::test]
async fn missing_file_field_is_no_file() {
    let h = Harness::new(Arc::new(EchoEngine)).await;

    let form = MultipartForm::new().add_text("comment", "forgot the attachment");
    let resp = h.server.post("/convertFile").multipart(form).await;
    assert_rejected(&h, resp, ErrorKind::NoFile).await;

    let resp = h
        .server
        .post("/convertFile")
        .json(&serde_json::json!({ "file": "not multipart" }))
        .await;
    assert_rejected(&h, resp, ErrorKind::NoFile).await;
}

#[tokio::test]
async fn empty_file_is_no_file() {
    let h = Harness::new(Arc::new(EchoEngine)).await;

    let resp = h.server.post("/convertFile").multipart(docx_form("empty.docx", Vec::new())).await;

    assert_rejected(&h, resp, ErrorKind::NoFile).await;
}

// ── Server-side failures ─────────────────────────────────────────────────────

async fn assert_server_error(h: &Harness, resp: axum_test::TestResponse, kind: ErrorKind) {
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = resp.json();
    assert!(!body.success);
    assert_eq!(body.error, kind);
    assert_eq!(h.leftover_files().await, 0, "failed request left files behind");
}

#[tokio::test]
async fn engine_failure_is_conversion_failed() {
    let h = Harness::new(Arc::new(FailingEngine)).await;

    let resp = h.server.post("/convertFile").multipart(docx_form("a.docx", sample_docx())).await;

    assert_server_error(&h, resp, ErrorKind::ConversionFailed).await;
}

#[tokio::test]
async fn engine_failure_detail_is_not_exposed() {
    let h = Harness::new(Arc::new(FailingEngine)).await;

    let resp = h.server.post("/convertFile").multipart(docx_form("a.docx", sample_docx())).await;

    let body: ErrorBody = resp.json();
    assert!(!body.message.contains("could not be loaded"), "{}", body.message);
}

#[tokio::test]
async fn engine_timeout_is_conversion_failed() {
    let h = Harness::new(Arc::new(HangingEngine)).await;

    let started = std::time::Instant::now();
    let resp = h.server.post("/convertFile").multipart(docx_form("slow.docx", sample_docx())).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_server_error(&h, resp, ErrorKind::ConversionFailed).await;
}

#[tokio::test]
async fn unwritable_output_is_write_failed() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    std::fs::remove_dir(&h.output_dir).unwrap();

    let resp = h.server.post("/convertFile").multipart(docx_form("a.docx", sample_docx())).await;

    assert_server_error(&h, resp, ErrorKind::WriteFailed).await;
    assert_eq!(count_files(&h.upload_dir), 0);
}

#[tokio::test]
async fn unwritable_upload_dir_is_write_failed() {
    let h = Harness::new(Arc::new(EchoEngine)).await;
    std::fs::remove_dir(&h.upload_dir).unwrap();

    let resp = h.server.post("/convertFile").multipart(docx_form("a.docx", sample_docx())).await;

    assert_server_error(&h, resp, ErrorKind::WriteFailed).await;
    assert_eq!(count_files(&h.output_dir), 0);
    assert!(!h.upload_dir.exists());
}

#[tokio::test]
async fn engine_panic_is_isolated() {
    let h = Harness::new(Arc::new(PanickyEngine)).await;

    let resp = h
        .server
        .post("/convertFile")
        .multipart(docx_form("bad.docx", b"boom".to_vec()))
        .await;
    assert_server_error(&h, resp, ErrorKind::InternalError).await;
    assert_eq!(h.guard.isolated_faults(), 1);

    // Still serving.
    h.server.get("/health").await.assert_status_ok();
    let resp = h
        .server
        .post("/convertFile")
        .multipart(docx_form("good.docx", b"PK fine".to_vec()))
        .await;
    resp.assert_status_ok();
    assert_eq!(h.guard.isolated_faults(), 1);
    assert_eq!(h.leftover_files().await, 0);
}
