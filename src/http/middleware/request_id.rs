//! Request correlation IDs.
//!
//! # Design Decisions
//! - An incoming `x-request-id` is kept when it is short and printable,
//!   otherwise a UUID v4 is generated
//! - The ID is added to the request headers, the request extensions and the
//!   response headers before the rest of the chain runs

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::context::Context;
use crate::handler::{handler_fn, middleware_fn, MiddlewareFunc};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_INCOMING_LEN: usize = 128;

/// Correlation ID stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the correlation ID from a Context.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl RequestIdExt for Context {
    fn request_id(&self) -> Option<&RequestId> {
        self.request().extensions().get::<RequestId>()
    }
}

pub fn request_id() -> MiddlewareFunc {
    middleware_fn(|next| {
        handler_fn(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let id = incoming_id(ctx).unwrap_or_else(|| Uuid::new_v4().to_string());
                if let Ok(value) = HeaderValue::from_str(&id) {
                    ctx.request_mut()
                        .headers_mut()
                        .insert(X_REQUEST_ID, value.clone());
                    ctx.response().headers_mut().insert(X_REQUEST_ID, value);
                }
                ctx.request_mut().extensions_mut().insert(RequestId(id));
                next(ctx).await
            })
        })
    })
}

fn incoming_id(ctx: &Context) -> Option<String> {
    ctx.request()
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_INCOMING_LEN)
        .map(str::to_owned)
}
