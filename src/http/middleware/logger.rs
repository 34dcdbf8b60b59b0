//! Access logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ConnectInfo;

use crate::error::status_and_message;
use crate::handler::{handler_fn, middleware_fn, MiddlewareFunc};
use crate::http::middleware::request_id::RequestIdExt;

/// Emit one `tracing` event per request.
///
/// The status is the one the error handler will answer with when the chain
/// below returns an error.
pub fn logger() -> MiddlewareFunc {
    middleware_fn(|next| {
        handler_fn(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let started = Instant::now();
                let method = ctx.request().method().clone();
                let path = ctx.original_uri().path().to_string();
                let remote = ctx
                    .request()
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.to_string())
                    .unwrap_or_default();

                let result = next(ctx).await;

                let status = match &result {
                    Err(err) => status_and_message(err.as_ref()).0,
                    Ok(()) => {
                        let observed = ctx.status();
                        ctx.response().written().unwrap_or(observed)
                    }
                };
                let request_id = ctx
                    .request_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default();

                tracing::info!(
                    request_id = %request_id,
                    remote = %remote,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = result.is_err(),
                    "Request handled"
                );
                result
            })
        })
    })
}
