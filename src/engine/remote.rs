//! Remote engine: a Gotenberg-compatible conversion service over HTTP.
//!
//! The document is posted as a multipart `files` part to
//! `{base_url}/forms/libreoffice/convert`; a 2xx response body is the PDF.
//! The client carries its own request timeout so a hung service cannot pin a
//! connection past the orchestrator's bound.

use super::{ensure_pdf, ConversionEngine};
use crate::config::DOCX_MEDIA_TYPE;
use crate::error::EngineError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

/// Route of the LibreOffice module in Gotenberg's API.
const CONVERT_ROUTE: &str = "/forms/libreoffice/convert";

/// Longest response-body excerpt carried into an error message.
const MAX_ERROR_BODY: usize = 300;

/// HTTP client for a remote conversion service.
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RemoteEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint_for(base_url),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ConversionEngine for RemoteEngine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let size = input.len();
        let part = Part::bytes(input)
            .file_name("document.docx")
            .mime_str(DOCX_MEDIA_TYPE)
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        let form = Form::new().part("files", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout {
                        secs: self.timeout.as_secs(),
                    }
                } else if e.is_connect() {
                    EngineError::Unavailable(format!("{}: {}", self.endpoint, e))
                } else {
                    EngineError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(EngineError::Failed(format!("HTTP {}: {}", status, body.trim())));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else {
                EngineError::Failed(format!("reading response body: {}", e))
            }
        })?;

        debug!("{} converted {} bytes into {} bytes", self.endpoint, size, bytes.len());
        ensure_pdf(bytes.to_vec())
    }
}

fn endpoint_for(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), CONVERT_ROUTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    #[test]
    fn endpoint_follows_base_url() {
        let engine = RemoteEngine::new("http://gotenberg:3000/", Duration::from_secs(5)).unwrap();
        assert_eq!(engine.endpoint(), "http://gotenberg:3000/forms/libreoffice/convert");
    }

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint_for("http://gotenberg:3000/"),
            "http://gotenberg:3000/forms/libreoffice/convert"
        );
        assert_eq!(
            endpoint_for("http://gotenberg:3000"),
            "http://gotenberg:3000/forms/libreoffice/convert"
        );
    }

    /// Serve `router` on an ephemeral port, return its base URL.
    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn posts_document_and_returns_pdf() {
        async fn fake_gotenberg(mut multipart: Multipart) -> Result<Vec<u8>, StatusCode> {
            while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
                if field.name() == Some("files") && field.file_name() == Some("document.docx") {
                    let body = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                    let mut pdf = b"%PDF-1.7\n".to_vec();
                    pdf.extend_from_slice(&body);
                    return Ok(pdf);
                }
            }
            Err(StatusCode::BAD_REQUEST)
        }

        let base = spawn(Router::new().route(CONVERT_ROUTE, post(fake_gotenberg))).await;
        let engine = RemoteEngine::new(&base, Duration::from_secs(5)).unwrap();
        let pdf = engine.convert(b"PK-docx-body".to_vec()).await.unwrap();
        assert!(pdf.starts_with(b"%PDF-1.7"));
        assert!(pdf.ends_with(b"PK-docx-body"));
    }

    #[tokio::test]
    async fn non_success_status_is_failed() {
        async fn broken() -> (StatusCode, &'static str) {
            (StatusCode::SERVICE_UNAVAILABLE, "LibreOffice is restarting")
        }

        let base = spawn(Router::new().route(CONVERT_ROUTE, post(broken))).await;
        let engine = RemoteEngine::new(&base, Duration::from_secs(5)).unwrap();
        match engine.convert(b"PK".to_vec()).await.unwrap_err() {
            EngineError::Failed(msg) => {
                assert!(msg.contains("503"), "got: {msg}");
                assert!(msg.contains("restarting"), "got: {msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "%PDF-late"
        }

        let base = spawn(Router::new().route(CONVERT_ROUTE, post(slow))).await;
        let engine = RemoteEngine::new(&base, Duration::from_millis(200)).unwrap();
        let err = engine.convert(b"PK".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = RemoteEngine::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = engine.convert(b"PK".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)), "got: {err:?}");
    }
}
