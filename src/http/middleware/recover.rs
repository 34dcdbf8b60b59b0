//! Panic recovery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::error::{panic_message, HttpError};
use crate::handler::{handler_fn, middleware_fn, MiddlewareFunc};

/// Turn a panic below this point into a 500 for the root's error handler.
pub fn recover() -> MiddlewareFunc {
    middleware_fn(|next| {
        handler_fn(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let guarded = AssertUnwindSafe(async { next(&mut *ctx).await }).catch_unwind();
                match guarded.await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref()).to_string();
                        tracing::error!(
                            method = %ctx.request().method(),
                            path = %ctx.original_uri().path(),
                            panic = %message,
                            "Handler panicked"
                        );
                        Err(HttpError::internal(format!("handler panicked: {message}")).into())
                    }
                }
            })
        })
    })
}
