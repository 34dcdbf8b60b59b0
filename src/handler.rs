//! Handlers, middleware and chain composition.
//!
//! A handler borrows the request [`Context`] and returns `Ok(())` or an error
//! for the root to resolve. Middleware wraps a handler into another handler.
//!
//! ```text
//! use_middleware(m0); use_middleware(m1); use_middleware(m2);
//! built = m0(m1(m2(terminal)))
//!
//! in:  m0 → m1 → m2 → terminal
//! out: terminal → m2 → m1 → m0
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::error::BoxError;

/// Outcome of a handler: `Ok(())` means handled, not "no content".
pub type HandlerResult = Result<(), BoxError>;

pub type HandlerFunc =
    Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync>;

pub type MiddlewareFunc = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;

/// Converts an error into exactly one response.
pub type ErrorHandlerFunc = Arc<dyn Fn(&mut Context, BoxError) + Send + Sync>;

/// Box a closure as a [`HandlerFunc`].
///
/// ```ignore
/// let hello = handler_fn(|ctx| Box::pin(async move {
///     ctx.response().write("hello")?;
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFunc
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn middleware_fn<F>(f: F) -> MiddlewareFunc
where
    F: Fn(HandlerFunc) -> HandlerFunc + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fold `middlewares` around `terminal`; the first registered ends up outermost.
pub fn compose(middlewares: &[MiddlewareFunc], terminal: HandlerFunc) -> HandlerFunc {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware(next))
}
