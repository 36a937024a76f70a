//! HTTP surface: `POST /convertFile` and `GET /health`.
//!
//! ## Middleware
//!
//! From the outside in:
//!
//! 1. `TraceLayer` — one span per request, status and latency on response
//! 2. `CorsLayer::permissive` — the service is called from browser front ends
//! 3. `X-Content-Type-Options: nosniff`, `X-Frame-Options: DENY`
//! 4. `CatchPanicLayer` — a panicking handler becomes `500 InternalError`
//!    via [`ProcessGuard::panic_response`]; the server keeps running
//!
//! The body limit sits slightly above the upload cap so that an oversized
//! file part is reported by the validator as `TooLarge` rather than as a
//! bare 413 from the extractor.

use crate::config::ServerConfig;
use crate::convert::Converter;
use crate::error::DocxError;
use crate::guard::ProcessGuard;
use crate::pipeline::input::read_upload;
use crate::pipeline::stage::StageTracker;
use crate::stream::into_download;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, Level};
use uuid::Uuid;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<Converter>,
    pub guard: Arc<ProcessGuard>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

/// Assemble the router with all middleware applied.
pub fn build_router(state: AppState) -> Router {
    let body_limit =
        (state.converter.validator().max_bytes() as usize).saturating_add(MULTIPART_OVERHEAD);
    let guard = Arc::clone(&state.guard);

    Router::new()
        .route("/convertFile", post(convert_file))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(
            move |payload: Box<dyn Any + Send + 'static>| guard.panic_response(payload),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// `POST /convertFile` — multipart upload in, PDF download out.
async fn convert_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, DocxError> {
    let mut tracker = StageTracker::new(Uuid::new_v4());
    let upload = match multipart {
        Ok(mut multipart) => read_upload(&mut multipart, state.converter.validator())
            .await
            .map_err(|e| tracker.reject(e))?,
        Err(rejection) => {
            debug!(
                request_id = %tracker.request_id(),
                "Not a multipart upload: {}",
                rejection.body_text()
            );
            None
        }
    };
    let output = state.converter.convert_tracked(tracker, upload).await?;
    into_download(output).await
}

/// `GET /health` — liveness only; does not probe the engine.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

/// A bound, not yet running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

/// Create the storage directories and the engine, start the stale-file
/// sweep, and bind the listener.
pub async fn bind(config: &ServerConfig, guard: Arc<ProcessGuard>) -> Result<Server, DocxError> {
    let converter = Arc::new(Converter::from_config(config).await?);
    bind_with(config, converter, guard).await
}

/// [`bind`] with an already built converter.
pub async fn bind_with(
    config: &ServerConfig,
    converter: Arc<Converter>,
    guard: Arc<ProcessGuard>,
) -> Result<Server, DocxError> {
    let addr = config.bind_addr().await?;

    let storage = converter.storage().clone();
    let max_age = config.stale_file_age;
    guard.spawn_detached("stale-file-sweep", async move {
        storage.sweep_stale(max_age).await.map(|_| ())
    });

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| DocxError::Internal(format!("cannot bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DocxError::Internal(format!("cannot read local address: {}", e)))?;
    info!(
        "Listening on http://{} (engine: {})",
        local_addr,
        converter.engine_name()
    );

    Ok(Server {
        listener,
        local_addr,
        router: build_router(AppState { converter, guard }),
    })
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves. In-flight requests are allowed to
    /// finish.
    pub async fn run<F>(self, shutdown: F) -> Result<(), DocxError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DocxError::Internal(format!("server error: {}", e)))?;
        info!("Server stopped");
        Ok(())
    }
}
