//! Raw response writer bridging the pipeline task and the transport.
//!
//! # Responsibilities
//! - Collect headers until the response head is committed
//! - Commit the head exactly once (first `write_header` or `write`)
//! - Stream body chunks to the transport after the head is sent
//!
//! # Data Flow
//! ```text
//! pipeline task                          transport (Mux::serve)
//!   write_header(status) ──oneshot──▶ Response<Body> returned to hyper
//!   write(chunk)        ──mpsc────▶ Body stream polled by hyper
//!   drop                ─────────▶ end of body
//! ```
//!
//! # Design Decisions
//! - Status is latched: later `write_header` calls are ignored with a warning
//! - 1xx heads carry no body channel, so the transport is free to upgrade
//! - The body channel is bounded: `write` fails with `WouldBlock` once it is
//!   full, `write_all` waits for the client to catch up
//! - The body stream holds a drop guard on the request lifetime token

use std::convert::Infallible;
use std::io;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Response, StatusCode};
use futures_util::stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Body chunks queued ahead of the transport before writers are held back.
pub const BODY_BUFFER_CHUNKS: usize = 16;

/// The underlying response target for one request.
#[derive(Debug)]
pub struct ResponseWriter {
    headers: HeaderMap,
    committed: Option<StatusCode>,
    head_tx: Option<oneshot::Sender<Response<Body>>>,
    body_tx: Option<mpsc::Sender<Bytes>>,
    lifetime: CancellationToken,
}

impl ResponseWriter {
    /// Create a writer and the receiver the transport waits on for the head.
    pub(crate) fn new(lifetime: CancellationToken) -> (Self, oneshot::Receiver<Response<Body>>) {
        let (head_tx, head_rx) = oneshot::channel();
        let writer = Self {
            headers: HeaderMap::new(),
            committed: None,
            head_tx: Some(head_tx),
            body_tx: None,
            lifetime,
        };
        (writer, head_rx)
    }

    /// Response headers. Changes made after the head is committed are not sent.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Status that was actually sent, if the head is committed.
    pub fn written(&self) -> Option<StatusCode> {
        self.committed
    }

    /// Send the response head.
    pub fn write_header(&mut self, status: StatusCode) {
        if let Some(sent) = self.committed {
            tracing::warn!(
                sent = %sent,
                ignored = %status,
                "Superfluous write_header call"
            );
            return;
        }
        self.commit(status);
    }

    /// Write a body chunk, sending a `200 OK` head first if none was sent.
    ///
    /// Never waits. Fails with [`io::ErrorKind::WouldBlock`] when
    /// [`BODY_BUFFER_CHUNKS`] chunks are already queued; use
    /// [`write_all`](Self::write_all) for bodies of unknown size.
    pub fn write(&mut self, data: impl Into<Bytes>) -> io::Result<usize> {
        let chunk = data.into();
        let len = chunk.len();
        let tx = self.body_sender()?;
        if len == 0 {
            return Ok(0);
        }
        tx.try_send(chunk).map(|_| len).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => io::Error::new(
                io::ErrorKind::WouldBlock,
                "response body buffer is full",
            ),
            mpsc::error::TrySendError::Closed(_) => client_gone(),
        })
    }

    /// Write a body chunk, waiting until the transport has room for it.
    pub async fn write_all(&mut self, data: impl Into<Bytes>) -> io::Result<usize> {
        let chunk = data.into();
        let len = chunk.len();
        let tx = self.body_sender()?;
        if len == 0 {
            return Ok(0);
        }
        tx.send(chunk).await.map(|_| len).map_err(|_| client_gone())
    }

    fn body_sender(&mut self) -> io::Result<mpsc::Sender<Bytes>> {
        if self.committed.is_none() {
            self.commit(StatusCode::OK);
        }
        self.body_tx
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "response has no body"))
    }

    /// Commit an untouched response as `200 OK` with an empty body.
    pub(crate) fn finish(&mut self) {
        if self.committed.is_none() {
            self.commit(StatusCode::OK);
        }
    }

    fn commit(&mut self, status: StatusCode) {
        let Some(head_tx) = self.head_tx.take() else {
            return;
        };
        self.committed = Some(status);

        let body = if status.is_informational() {
            Body::empty()
        } else {
            let (body_tx, body_rx) = mpsc::channel::<Bytes>(BODY_BUFFER_CHUNKS);
            self.body_tx = Some(body_tx);
            let guard = self.lifetime.clone().drop_guard();
            Body::from_stream(stream::unfold(
                (body_rx, guard),
                |(mut body_rx, guard)| async move {
                    match body_rx.recv().await {
                        Some(chunk) => Some((Ok::<_, Infallible>(chunk), (body_rx, guard))),
                        None => None,
                    }
                },
            ))
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        if head_tx.send(response).is_err() {
            tracing::debug!(status = %status, "Transport dropped before response head was sent");
        }
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client went away")
}
