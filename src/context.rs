//! Per-request state threaded through the handler chain.
//!
//! # Responsibilities
//! - Own the request, the raw writer and the intercepting sink
//! - Record the observed status and the pending handler error
//! - Expose the request lifetime token
//! - Route `report_error` to the owning root's error handler
//!
//! # Design Decisions
//! - One Context per request, created by `Mux::serve`, passed as `&mut`
//!   through every stage and dropped when the pipeline returns
//! - The lifetime token is held, not embedded; accessors pass through

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::BoxError;
use crate::handler::HandlerResult;
use crate::http::intercept::{InterceptingSink, ResponseSink};
use crate::http::writer::ResponseWriter;
use crate::routing::fallback::Fallbacks;

/// Mutable state for one in-flight request.
pub struct Context {
    lifetime: CancellationToken,
    status: StatusCode,
    err: Option<BoxError>,
    fallbacks: Arc<Fallbacks>,
    request: Request<Body>,
    original_uri: Uri,
    sink: InterceptingSink,
}

impl Context {
    pub(crate) fn new(
        request: Request<Body>,
        writer: ResponseWriter,
        fallbacks: Arc<Fallbacks>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            lifetime,
            status: StatusCode::OK,
            err: None,
            fallbacks,
            original_uri: request.uri().clone(),
            request,
            sink: InterceptingSink::new(writer),
        }
    }

    /// The raw response writer, bypassing interception.
    pub fn response(&mut self) -> &mut ResponseWriter {
        self.sink.raw()
    }

    /// The intercepting sink used by the pattern table and file services.
    pub fn sink(&mut self) -> ResponseSink<'_> {
        ResponseSink::new(&mut self.sink, &mut self.status)
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Take the request body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(self.request.body_mut())
    }

    /// URI as received, before any mount point stripped a prefix.
    pub fn original_uri(&self) -> &Uri {
        &self.original_uri
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Hand `err` to the owning root's error handler right away.
    pub fn report_error(&mut self, err: impl Into<BoxError>) {
        let fallbacks = Arc::clone(&self.fallbacks);
        (fallbacks.error)(self, err.into());
    }

    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Resolves once the client is gone or the request has finished.
    ///
    /// The future owns a clone of the token, so it does not borrow the Context.
    pub fn cancelled(&self) -> WaitForCancellationFutureOwned {
        self.lifetime.clone().cancelled_owned()
    }

    pub(crate) fn fallbacks(&self) -> Arc<Fallbacks> {
        Arc::clone(&self.fallbacks)
    }

    pub(crate) fn sink_latched(&self) -> bool {
        self.sink.is_done()
    }

    pub(crate) fn record(&mut self, result: HandlerResult) {
        self.err = result.err();
    }

    pub(crate) fn take_error(&mut self) -> HandlerResult {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Rewrite the request path without `prefix`, returning the URI to restore.
    pub(crate) fn strip_prefix(&mut self, prefix: &str) -> Uri {
        let original = self.request.uri().clone();
        if prefix.is_empty() {
            return original;
        }

        let Some(rest) = original.path().strip_prefix(prefix) else {
            return original;
        };
        let path_and_query = match original.query() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };

        let mut parts = original.clone().into_parts();
        match path_and_query.parse() {
            Ok(pq) => parts.path_and_query = Some(pq),
            Err(_) => return original,
        }
        if let Ok(stripped) = Uri::from_parts(parts) {
            *self.request.uri_mut() = stripped;
        }
        original
    }

    pub(crate) fn restore_uri(&mut self, uri: Uri) {
        *self.request.uri_mut() = uri;
    }

    pub(crate) fn finish(&mut self) {
        self.sink.raw().finish();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("status", &self.status)
            .field("err", &self.err)
            .field("cancelled", &self.lifetime.is_cancelled())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{context, get};
    use super::*;
    use crate::error::HttpError;

    #[test]
    fn strip_prefix_keeps_query_and_restores() {
        let (mut ctx, _head) = context(get("/api/users?page=2"));
        let original = ctx.strip_prefix("/api");
        assert_eq!(ctx.request().uri().path(), "/users");
        assert_eq!(ctx.request().uri().query(), Some("page=2"));
        ctx.restore_uri(original);
        assert_eq!(ctx.request().uri().path(), "/api/users");
        assert_eq!(ctx.original_uri().path(), "/api/users");
    }

    #[test]
    fn strip_prefix_ignores_foreign_paths() {
        let (mut ctx, _head) = context(get("/other"));
        ctx.strip_prefix("/api");
        assert_eq!(ctx.request().uri().path(), "/other");
    }

    #[tokio::test]
    async fn report_error_writes_through_raw_writer() {
        let (mut ctx, head) = context(get("/"));
        ctx.report_error(HttpError::new(StatusCode::CONFLICT, "taken"));
        assert_eq!(ctx.status(), StatusCode::CONFLICT);
        drop(ctx);

        let response = head.await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"taken");
    }

    #[test]
    fn recorded_error_is_taken_once() {
        let (mut ctx, _head) = context(get("/"));
        ctx.record(Err("boom".into()));
        assert!(ctx.take_error().is_err());
        assert!(ctx.take_error().is_ok());
    }
}
