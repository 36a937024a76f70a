//! Delivery: stream a ConvertedArtifact to the client, then clean up.
//!
//! The response body is a [`DeliveryStream`] reading the artifact from disk.
//! It owns the request's [`RequestFiles`], so both files are deleted exactly
//! when the send concludes:
//!
//! * the last chunk has been handed to the transport,
//! * reading the artifact failed mid-send, or
//! * the body was dropped early (client disconnected, server shutting down).
//!
//! Deletion never happens while the file is still being read. On the first
//! two paths the stream awaits the deletion before it reports its end; on
//! the last it is spawned onto the runtime.

use crate::config::PDF_MEDIA_TYPE;
use crate::error::DocxError;
use crate::output::ConversionOutput;
use crate::pipeline::stage::{Stage, StageTracker};
use crate::storage::RequestFiles;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::{ready, Future, Stream};
use std::fmt::Write as _;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::runtime::Handle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Build the `200 application/pdf` download response for `output`.
pub async fn into_download(output: ConversionOutput) -> Result<Response, DocxError> {
    let disposition = content_disposition(&output.download_name);
    let length = output.stats.output_bytes;
    let body = DeliveryStream::open(output).await?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PDF_MEDIA_TYPE)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Why the send ended.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Complete,
    ReadFailed,
    Abandoned,
}

struct Finish {
    files: RequestFiles,
    tracker: StageTracker,
}

/// Body stream over a ConvertedArtifact that removes the request's files
/// when it ends or is dropped.
pub struct DeliveryStream {
    reader: Option<ReaderStream<File>>,
    finish: Option<Finish>,
    cleanup: Option<BoxFuture<'static, ()>>,
    read_error: Option<io::Error>,
    sent: u64,
    expected: u64,
}

impl DeliveryStream {
    /// Open the artifact of `output` for streaming.
    ///
    /// If the artifact cannot be opened the request is marked failed and its
    /// files are removed before the error is returned.
    pub async fn open(output: ConversionOutput) -> Result<Self, DocxError> {
        let ConversionOutput {
            artifact_path,
            files,
            mut tracker,
            stats,
            ..
        } = output;

        match File::open(&artifact_path).await {
            Ok(file) => Ok(Self {
                reader: Some(ReaderStream::new(file)),
                finish: Some(Finish { files, tracker }),
                cleanup: None,
                read_error: None,
                sent: 0,
                expected: stats.output_bytes,
            }),
            Err(e) => {
                tracker.advance(Stage::Failed);
                files.cleanup().await;
                Err(DocxError::Internal(format!(
                    "cannot open artifact {}: {}",
                    artifact_path.display(),
                    e
                )))
            }
        }
    }

    /// Bytes handed to the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Close the artifact and hand back the deletion of the request's files,
    /// or `None` if that already happened.
    fn conclude(&mut self, outcome: Outcome) -> Option<BoxFuture<'static, ()>> {
        // Close the file before deleting it.
        self.reader = None;

        let Finish { files, mut tracker } = self.finish.take()?;
        let request_id = tracker.request_id();
        match outcome {
            Outcome::Complete => info!(
                request_id = %request_id,
                "Delivered {} bytes", self.sent
            ),
            Outcome::ReadFailed | Outcome::Abandoned => warn!(
                request_id = %request_id,
                "Delivery ended early ({:?}) after {} of {} bytes",
                outcome,
                self.sent,
                self.expected
            ),
        }
        Some(Box::pin(async move {
            let removed = files.cleanup().await;
            tracker.advance(Stage::CleanedUp);
            debug!(request_id = %request_id, "Removed {} file(s) after delivery", removed);
        }))
    }
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(reader) = this.reader.as_mut() {
            match Pin::new(reader).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.sent += chunk.len() as u64;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!("Reading artifact failed: {}", e);
                    this.read_error = Some(e);
                    this.cleanup = this.conclude(Outcome::ReadFailed);
                }
                Poll::Ready(None) => {
                    this.cleanup = this.conclude(Outcome::Complete);
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if let Some(cleanup) = this.cleanup.as_mut() {
            ready!(cleanup.as_mut().poll(cx));
            this.cleanup = None;
        }
        Poll::Ready(this.read_error.take().map(Err))
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        let cleanup = match self.cleanup.take() {
            Some(in_flight) => Some(in_flight),
            None => self.conclude(Outcome::Abandoned),
        };
        let Some(cleanup) = cleanup else {
            return;
        };
        // Without a runtime the future is dropped unpolled and the files go
        // through `RequestFiles`' own drop.
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(cleanup);
        }
    }
}

/// `attachment` disposition for `name`, with an RFC 5987 `filename*` when
/// the name is not plain ASCII.
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if fallback != name {
        value.push_str("; filename*=UTF-8''");
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                value.push(b as char);
            } else {
                let _ = write!(value, "%{:02X}", b);
            }
        }
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
