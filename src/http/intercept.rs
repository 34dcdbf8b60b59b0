//! Intercepting response sink.
//!
//! The pattern table and the file services write through this sink rather
//! than the raw writer. The first header write is inspected: a 404 or 405
//! latches the sink shut before anything reaches the client, which leaves the
//! root router free to substitute its own fallback response.
//!
//! A latched sink stays shut for the rest of the request. Fallback and error
//! handlers produce their output through the raw writer
//! (`Context::response`), so exactly one substitution happens per request.

use std::io;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

use crate::http::writer::ResponseWriter;

/// Statuses that mean "no route matched" when they come through the sink.
pub fn is_sentinel(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED
}

/// Wraps the raw writer for one request.
#[derive(Debug)]
pub struct InterceptingSink {
    raw: ResponseWriter,
    done: bool,
}

impl InterceptingSink {
    pub(crate) fn new(raw: ResponseWriter) -> Self {
        Self { raw, done: false }
    }

    pub(crate) fn raw(&mut self) -> &mut ResponseWriter {
        &mut self.raw
    }

    /// Whether a sentinel status latched the sink.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Borrowed view of the sink plus the Context status it reports into.
#[derive(Debug)]
pub struct ResponseSink<'a> {
    sink: &'a mut InterceptingSink,
    status: &'a mut StatusCode,
}

impl<'a> ResponseSink<'a> {
    pub(crate) fn new(sink: &'a mut InterceptingSink, status: &'a mut StatusCode) -> Self {
        Self { sink, status }
    }

    /// Headers of the underlying response. Header edits are never suppressed.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.sink.raw.headers_mut()
    }

    pub fn write_header(&mut self, status: StatusCode) {
        if self.sink.done {
            return;
        }

        *self.status = status;
        if is_sentinel(status) {
            tracing::trace!(status = %status, "Sentinel status intercepted");
            self.sink.done = true;
            return;
        }

        self.sink.raw.write_header(status);
    }

    /// Write a body chunk. Once latched, reports zero bytes and no error.
    pub fn write(&mut self, data: impl Into<Bytes>) -> io::Result<usize> {
        if self.sink.done {
            return Ok(0);
        }
        self.sink.raw.write(data)
    }

    /// Like [`write`](Self::write), but waits for the client to drain the body.
    pub async fn write_all(&mut self, data: impl Into<Bytes>) -> io::Result<usize> {
        if self.sink.done {
            return Ok(0);
        }
        self.sink.raw.write_all(data).await
    }

    pub fn is_done(&self) -> bool {
        self.sink.done
    }
}
