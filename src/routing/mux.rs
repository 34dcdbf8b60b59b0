//! Root router and request entry point.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → Mux::serve (allocate Context, spawn pipeline task)
//!     → error resolution stage
//!     → middleware chain (first registered outermost)
//!     → pattern table → handler | sentinel 404/405 → fallback
//!     ← Response<Body> as soon as the head is committed
//! ```
//!
//! # Design Decisions
//! - The pipeline runs in its own task; `serve` only waits for the response
//!   head, so an upgrade handler can send `101` and keep running
//! - Fallbacks are swapped atomically and read once per request

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{canonical_reason, BoxError};
use crate::handler::{handler_fn, HandlerFunc, HandlerResult, MiddlewareFunc};
use crate::http::writer::ResponseWriter;
use crate::routing::fallback::Fallbacks;
use crate::routing::router::Router;
use crate::websocket::WebSocketContext;

/// A root router: owns the fallback and error policy and serves requests.
///
/// Cloning is cheap; clones share the same tree.
#[derive(Clone)]
pub struct Mux {
    router: Router,
    fallbacks: Arc<ArcSwap<Fallbacks>>,
}

impl Mux {
    /// Create a root with the default fallbacks installed.
    pub fn new() -> Self {
        Self::with_fallbacks(Fallbacks::default())
    }

    pub fn with_fallbacks(fallbacks: Fallbacks) -> Self {
        Self {
            router: Router::with_root(true),
            fallbacks: Arc::new(ArcSwap::from_pointee(fallbacks)),
        }
    }

    /// The root's own router node.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Replace the not-found fallback.
    pub fn not_found<F>(&self, handler: F)
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let handler = handler_fn(handler);
        self.fallbacks
            .rcu(|current| Fallbacks::clone(current).not_found(Arc::clone(&handler)));
    }

    /// Replace the method-not-allowed fallback.
    pub fn method_not_allowed<F>(&self, handler: F)
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let handler = handler_fn(handler);
        self.fallbacks
            .rcu(|current| Fallbacks::clone(current).method_not_allowed(Arc::clone(&handler)));
    }

    /// Replace the error handler.
    pub fn error_handler<F>(&self, handler: F)
    where
        F: Fn(&mut Context, BoxError) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.fallbacks.rcu(|current| {
            let handler = Arc::clone(&handler);
            Fallbacks::clone(current).on_error(move |ctx: &mut Context, err| handler(ctx, err))
        });
    }

    /// See [`Router::handle`].
    pub fn handle<F>(&self, pattern: &str, handler: F)
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.router.handle(pattern, handler);
    }

    pub fn handle_func(&self, pattern: &str, handler: HandlerFunc) {
        self.router.handle_func(pattern, handler);
    }

    /// See [`Router::websocket`].
    pub fn websocket<F>(&self, pattern: &str, callback: F)
    where
        F: for<'a> Fn(WebSocketContext<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.router.websocket(pattern, callback);
    }

    pub fn use_middleware(&self, middleware: MiddlewareFunc) {
        self.router.use_middleware(middleware);
    }

    pub fn mount(&self, prefix: &str, router: Router) {
        self.router.mount(prefix, router);
    }

    pub fn route(&self, prefix: &str, f: impl FnOnce(&Router)) {
        self.router.route(prefix, f);
    }

    pub fn static_dir(&self, prefix: &str, root: impl AsRef<Path>) {
        self.router.static_dir(prefix, root);
    }

    pub fn file(&self, pattern: &str, file: impl AsRef<Path>) {
        self.router.file(pattern, file);
    }

    /// Serve one request end to end.
    ///
    /// Resolves once the response head is committed; the body keeps
    /// streaming from the pipeline task.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        let handler = self.router.handler();
        let fallbacks = self.fallbacks.load_full();

        let lifetime = CancellationToken::new();
        let (writer, head) = ResponseWriter::new(lifetime.clone());
        let ctx = Context::new(request, writer, fallbacks, lifetime.clone());

        // Cancels the request if the transport drops this future early.
        let pending = lifetime.clone().drop_guard();
        tokio::spawn(run_pipeline(handler, ctx));

        match head.await {
            Ok(response) => {
                let _ = pending.disarm();
                response
            }
            Err(_) => {
                drop(pending);
                tracing::error!("Request pipeline ended without a response; answering 500");
                internal_error_response()
            }
        }
    }
}

async fn run_pipeline(handler: HandlerFunc, mut ctx: Context) {
    // The root's error stage always resolves to Ok.
    let _ = handler(&mut ctx).await;
    ctx.finish();
    let lifetime = ctx.lifetime().clone();
    drop(ctx);
    lifetime.cancel();
}

fn internal_error_response() -> Response<Body> {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut response = Response::new(Body::from(canonical_reason(status)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux").field("router", &self.router).finish()
    }
}

impl tower::Service<Request<Body>> for Mux {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let mux = self.clone();
        Box::pin(async move { Ok(mux.serve(request).await) })
    }
}
