//! Fallback and error policy owned by a root router.
//!
//! # Responsibilities
//! - Hold the not-found, method-not-allowed and error handlers of one root
//! - Provide the default handlers
//! - Turn an error into exactly one plain-text response
//!
//! # Design Decisions
//! - Defaults are built by constructor functions, never global mutable state
//! - Default fallbacks return an `HttpError`, so middleware sees the miss as
//!   an error on the way out and the error handler writes the response
//! - The error handler writes through the raw writer; the intercepting sink
//!   may already be latched at that point

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};

use crate::context::Context;
use crate::error::{canonical_reason, status_and_message, BoxError, HttpError};
use crate::handler::{handler_fn, ErrorHandlerFunc, HandlerFunc};

/// Handlers a root router falls back to.
#[derive(Clone)]
pub struct Fallbacks {
    pub(crate) not_found: HandlerFunc,
    pub(crate) method_not_allowed: HandlerFunc,
    pub(crate) error: ErrorHandlerFunc,
}

impl Fallbacks {
    pub fn new() -> Self {
        Self {
            not_found: default_not_found(),
            method_not_allowed: default_method_not_allowed(),
            error: Arc::new(default_error_handler),
        }
    }

    pub fn not_found(mut self, handler: HandlerFunc) -> Self {
        self.not_found = handler;
        self
    }

    pub fn method_not_allowed(mut self, handler: HandlerFunc) -> Self {
        self.method_not_allowed = handler;
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Context, BoxError) + Send + Sync + 'static,
    {
        self.error = Arc::new(handler);
        self
    }
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallbacks").finish_non_exhaustive()
    }
}

pub fn default_not_found() -> HandlerFunc {
    status_fallback(StatusCode::NOT_FOUND)
}

pub fn default_method_not_allowed() -> HandlerFunc {
    status_fallback(StatusCode::METHOD_NOT_ALLOWED)
}

fn status_fallback(status: StatusCode) -> HandlerFunc {
    handler_fn(move |_ctx| {
        Box::pin(async move {
            Err(BoxError::from(HttpError::new(status, canonical_reason(status))))
        })
    })
}

/// Write `err` as a plain-text response on the raw writer.
///
/// Only an [`HttpError`] message reaches the client; anything else is
/// answered with a generic 500 and logged.
pub fn default_error_handler(ctx: &mut Context, err: BoxError) {
    let (status, message) = status_and_message(err.as_ref());

    if status.is_server_error() {
        let cause = std::error::Error::source(err.as_ref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| err.to_string());
        tracing::error!(
            method = %ctx.request().method(),
            path = %ctx.original_uri().path(),
            status = %status,
            error = %cause,
            "Request failed"
        );
    } else {
        tracing::debug!(
            method = %ctx.request().method(),
            path = %ctx.original_uri().path(),
            status = %status,
            error = %message,
            "Request rejected"
        );
    }

    ctx.set_status(status);

    let writer = ctx.response();
    let headers = writer.headers_mut();
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    writer.write_header(status);
    if let Err(e) = writer.write(message) {
        tracing::debug!(error = %e, "Error body not written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context, get};

    async fn body_of(head: tokio::sync::oneshot::Receiver<axum::http::Response<axum::body::Body>>) -> (StatusCode, String) {
        let response = head.await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn http_error_status_and_message_are_used() {
        let (mut ctx, head) = context(get("/"));
        default_error_handler(&mut ctx, HttpError::new(StatusCode::BAD_REQUEST, "bad input").into());
        assert_eq!(ctx.status(), StatusCode::BAD_REQUEST);
        drop(ctx);
        assert_eq!(body_of(head).await, (StatusCode::BAD_REQUEST, "bad input".to_string()));
    }

    #[tokio::test]
    async fn plain_error_text_is_never_exposed() {
        let (mut ctx, head) = context(get("/"));
        default_error_handler(&mut ctx, BoxError::from("secret connection string"));
        drop(ctx);
        let (status, body) = body_of(head).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");
    }

    #[tokio::test]
    async fn default_fallbacks_return_http_errors() {
        let (mut ctx, _head) = context(get("/"));
        let err = default_not_found()(&mut ctx).await.unwrap_err();
        let (status, message) = status_and_message(err.as_ref());
        assert_eq!((status, message.as_str()), (StatusCode::NOT_FOUND, "Not Found"));

        let err = default_method_not_allowed()(&mut ctx).await.unwrap_err();
        let (status, message) = status_and_message(err.as_ref());
        assert_eq!(
            (status, message.as_str()),
            (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        );
    }
}
