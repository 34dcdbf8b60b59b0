//! Static directory and single-file handlers.
//!
//! Both delegate to `tower_http::services` and copy the service response
//! through the intercepting sink, so a missing file becomes the sentinel 404
//! and the root's not-found fallback answers it.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};
use futures_util::StreamExt;
use tower::ServiceExt;
use tower_http::services::fs::ServeFileSystemResponseBody;
use tower_http::services::{ServeDir, ServeFile};

use crate::context::Context;
use crate::error::HttpError;
use crate::handler::{handler_fn, HandlerFunc, HandlerResult};

/// Serve files below `root`; `prefix` is stripped from the request path.
pub(crate) fn serve_dir(prefix: String, root: &Path) -> HandlerFunc {
    let dir = ServeDir::new(root);
    tracing::debug!(prefix = %prefix, root = %root.display(), "Static directory registered");

    handler_fn(move |ctx| {
        let dir = dir.clone();
        let prefix = prefix.clone();
        Box::pin(async move {
            let original = ctx.strip_prefix(&prefix);
            let request = file_request(ctx);
            ctx.restore_uri(original);

            let response = dir
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {});
            forward(ctx, response, &prefix).await
        })
    })
}

pub(crate) fn serve_file(path: &Path) -> HandlerFunc {
    let file = ServeFile::new(path);

    handler_fn(move |ctx| {
        let file = file.clone();
        Box::pin(async move {
            let request = file_request(ctx);
            let response = file
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {});
            forward(ctx, response, "").await
        })
    })
}

/// A body-less copy of the current request for the file service.
fn file_request(ctx: &Context) -> Request<Body> {
    let source = ctx.request();
    let mut request = Request::new(Body::empty());
    *request.method_mut() = source.method().clone();
    *request.uri_mut() = source.uri().clone();
    *request.version_mut() = source.version();
    *request.headers_mut() = source.headers().clone();
    request
}

async fn forward(
    ctx: &mut Context,
    response: Response<ServeFileSystemResponseBody>,
    prefix: &str,
) -> HandlerResult {
    let (mut parts, body) = response.into_parts();

    // Directory redirects are computed against the stripped path.
    if parts.status.is_redirection() && !prefix.is_empty() {
        let location = parts
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with('/'))
            .map(|v| format!("{prefix}{v}"));
        if let Some(value) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            parts.headers.insert(header::LOCATION, value);
        }
    }

    let mut sink = ctx.sink();
    sink.headers_mut().extend(parts.headers);
    sink.write_header(parts.status);
    if sink.is_done() {
        return Ok(());
    }

    let mut stream = Body::new(body).into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(HttpError::internal)?;
        if let Err(e) = sink.write_all(chunk).await {
            tracing::debug!(error = %e, "Client went away during file transfer");
            break;
        }
    }
    Ok(())
}
