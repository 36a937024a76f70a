//! Process guard: keep serving after per-request faults, stop on process
//! faults.
//!
//! Two classes of unexpected failure are distinguished:
//!
//! * **Isolated** — a panic inside one request handler, or an error or panic
//!   in a detached background task (the startup sweep). These are logged,
//!   counted and contained; the server keeps accepting requests. A panicking
//!   handler answers `500 InternalError` through [`ProcessGuard::panic_response`].
//!
//! * **Fatal** — the server task itself fails. [`ProcessGuard::terminate`]
//!   logs the cause and exits the process with status 1 so a supervisor can
//!   restart it.

use crate::error::{DocxError, ErrorKind};
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

static PANIC_HOOK: Once = Once::new();

#[derive(Debug, Default)]
pub struct ProcessGuard {
    isolated: AtomicU64,
}

impl ProcessGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route panic messages through `tracing` (with location) instead of
    /// raw stderr. Installed once per process; later calls are no-ops.
    pub fn install_panic_hook(&self) {
        PANIC_HOOK.call_once(|| {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}", l.file(), l.line()))
                    .unwrap_or_else(|| "<unknown>".to_string());
                error!(
                    "Panic at {}: {}",
                    location,
                    panic_message(info.payload())
                );
                if tracing::enabled!(tracing::Level::TRACE) {
                    previous(info);
                }
            }));
            debug!("Panic hook installed");
        });
    }

    /// Number of faults contained so far.
    pub fn isolated_faults(&self) -> u64 {
        self.isolated.load(Ordering::Relaxed)
    }

    /// Log and count a contained fault.
    pub fn record_isolated(&self, origin: &str, detail: &dyn Display) {
        let n = self.isolated.fetch_add(1, Ordering::Relaxed) + 1;
        error!("Isolated fault #{} in {}: {}", n, origin, detail);
    }

    /// Response for a handler panic caught by
    /// [`tower_http::catch_panic::CatchPanicLayer`].
    pub fn panic_response(&self, payload: Box<dyn Any + Send + 'static>) -> Response {
        let message = panic_message(&*payload);
        self.record_isolated("request handler", &message);
        let err = DocxError::Internal(format!("handler panicked: {}", message));
        debug_assert_eq!(err.kind(), ErrorKind::InternalError);
        err.into_response()
    }

    /// Run `fut` in the background. Its error or panic is recorded as an
    /// isolated fault instead of being lost with the task.
    pub fn spawn_detached<F, E>(self: &Arc<Self>, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let guard = Arc::clone(self);
        let task = tokio::spawn(fut);
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => debug!("Background task '{}' finished", name),
                Ok(Err(e)) => guard.record_isolated(name, &e),
                Err(join) if join.is_panic() => {
                    let payload = join.into_panic();
                    let message = panic_message(&*payload);
                    guard.record_isolated(name, &format!("panicked: {}", message));
                }
                Err(_) => debug!("Background task '{}' cancelled", name),
            }
        })
    }

    /// Log a fatal fault and exit with status 1.
    pub fn terminate(&self, reason: &dyn Display) -> ! {
        error!(
            "Fatal: {} ({} isolated fault(s) before this)",
            reason,
            self.isolated_faults()
        );
        info!("Exiting with status 1");
        std::process::exit(1)
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*s), "static str");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*s), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*s), "<non-string panic payload>");
    }

    #[test]
    fn panic_response_is_internal_error() {
        let guard = ProcessGuard::new();
        let resp = guard.panic_response(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(guard.isolated_faults(), 1);
    }

    #[tokio::test]
    async fn detached_failures_are_counted() {
        let guard = ProcessGuard::new();

        guard
            .spawn_detached("ok", async { Ok::<(), String>(()) })
            .await
            .unwrap();
        assert_eq!(guard.isolated_faults(), 0);

        guard
            .spawn_detached("err", async { Err::<(), _>("disk on fire") })
            .await
            .unwrap();
        assert_eq!(guard.isolated_faults(), 1);

        guard
            .spawn_detached("panic", async {
                if true {
                    panic!("background panic");
                }
                Ok::<(), String>(())
            })
            .await
            .unwrap();
        assert_eq!(guard.isolated_faults(), 2);
    }
}
