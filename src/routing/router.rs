//! Router tree nodes.
//!
//! # Responsibilities
//! - Register leaf handlers, websocket endpoints and file services
//! - Mount sub-routers under a prefix, declare route groups
//! - Compose the middleware chain lazily, once
//!
//! # Design Decisions
//! - The first registration (or first request) builds the chain; middleware
//!   added after that is ignored with a warning
//! - The chain captures the table by `Arc`, so registrations made after the
//!   build still reach dispatch
//! - An inline router never resolves misses or errors; its root does
//!
//! # Usage
//! Registration is a setup-phase activity. Registering while requests are
//! in flight is unsupported: the table swap is atomic, but which requests
//! observe the new entry is unspecified.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::handler::{compose, handler_fn, HandlerFunc, HandlerResult, MiddlewareFunc};
use crate::routing::files;
use crate::routing::table::ServeMux;
use crate::websocket::{self, WebSocketContext};

struct RouterInner {
    table: Arc<ArcSwap<ServeMux>>,
    middlewares: Mutex<Vec<MiddlewareFunc>>,
    handler: OnceLock<HandlerFunc>,
    root: bool,
}

/// A node in the routing tree.
///
/// `Router::new()` creates an inline router meant to be mounted under a
/// [`Mux`](crate::Mux), which owns the fallback and error policy.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create an inline router.
    pub fn new() -> Self {
        Self::with_root(false)
    }

    pub(crate) fn with_root(root: bool) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                table: Arc::new(ArcSwap::from_pointee(ServeMux::new())),
                middlewares: Mutex::new(Vec::new()),
                handler: OnceLock::new(),
                root,
            }),
        }
    }

    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    /// Whether the chain has been composed and middleware is frozen.
    pub fn is_built(&self) -> bool {
        self.inner.handler.get().is_some()
    }

    /// Register `handler` at `pattern` (`"/path"`, `"/tree/"`, `"GET /path"`).
    ///
    /// # Panics
    /// Panics if the pattern is malformed or already registered.
    pub fn handle<F>(&self, pattern: &str, handler: F)
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.handle_func(pattern, handler_fn(handler));
    }

    /// Register an already boxed handler.
    ///
    /// # Panics
    /// Panics if the pattern is malformed or already registered.
    pub fn handle_func(&self, pattern: &str, handler: HandlerFunc) {
        self.register(pattern, handler);
    }

    /// Register a websocket endpoint at `pattern`.
    ///
    /// # Panics
    /// Panics if the pattern is malformed or already registered.
    pub fn websocket<F>(&self, pattern: &str, callback: F)
    where
        F: for<'a> Fn(WebSocketContext<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(pattern, websocket::endpoint(websocket::websocket_fn(callback)));
    }

    /// Append middleware. Ignored once the chain has been built.
    pub fn use_middleware(&self, middleware: MiddlewareFunc) {
        let mut middlewares = self
            .inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_built() {
            tracing::warn!("Middleware added after the router was built; ignoring it");
            return;
        }
        middlewares.push(middleware);
    }

    /// Serve `router` under `prefix`, stripping the prefix before it dispatches.
    ///
    /// # Panics
    /// Panics if `prefix` is malformed or already registered.
    pub fn mount(&self, prefix: &str, router: Router) {
        let trimmed = prefix.trim_end_matches('/').to_string();
        let pattern = format!("{trimmed}/");

        self.register(
            &pattern,
            handler_fn(move |ctx| {
                let router = router.clone();
                let prefix = trimmed.clone();
                Box::pin(async move {
                    let original = ctx.strip_prefix(&prefix);
                    let handler = router.handler();
                    let result = handler(ctx).await;
                    ctx.restore_uri(original);
                    result
                })
            }),
        );
    }

    /// Create an inline router, let `f` populate it, and mount it at `prefix`.
    pub fn route(&self, prefix: &str, f: impl FnOnce(&Router)) {
        self.freeze();
        let router = Router::new();
        f(&router);
        self.mount(prefix, router);
    }

    /// Serve files below `root` under `prefix`.
    ///
    /// # Panics
    /// Panics if `prefix` is malformed or already registered.
    pub fn static_dir(&self, prefix: &str, root: impl AsRef<Path>) {
        let trimmed = prefix.trim_end_matches('/').to_string();
        let pattern = format!("{trimmed}/");
        self.register(&pattern, files::serve_dir(trimmed, root.as_ref()));
    }

    /// Serve a single file at `pattern`.
    ///
    /// # Panics
    /// Panics if the pattern is malformed or already registered.
    pub fn file(&self, pattern: &str, file: impl AsRef<Path>) {
        self.register(pattern, files::serve_file(file.as_ref()));
    }

    /// The composed handler, built on first use.
    pub fn handler(&self) -> HandlerFunc {
        Arc::clone(self.inner.handler.get_or_init(|| self.build()))
    }

    fn freeze(&self) {
        let _ = self.handler();
    }

    fn register(&self, pattern: &str, handler: HandlerFunc) {
        self.freeze();
        let mut table = ServeMux::clone(&self.inner.table.load());
        if let Err(e) = table.register(pattern, handler) {
            panic!("http-mux: cannot register `{pattern}`: {e}");
        }
        self.inner.table.store(Arc::new(table));
    }

    fn build(&self) -> HandlerFunc {
        let middlewares = self
            .inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!(
            root = self.inner.root,
            middlewares = middlewares.len(),
            "Building router chain"
        );

        let handler = compose(&middlewares, self.terminal());
        if self.inner.root {
            resolve_errors(handler)
        } else {
            handler
        }
    }

    /// Dispatch through the table; at a root, substitute fallbacks for
    /// intercepted misses.
    fn terminal(&self) -> HandlerFunc {
        let table = Arc::clone(&self.inner.table);
        let root = self.inner.root;

        handler_fn(move |ctx| {
            let table = Arc::clone(&table);
            Box::pin(async move {
                let mux = table.load_full();
                mux.serve(ctx).await;

                if root && ctx.sink_latched() {
                    let fallbacks = ctx.fallbacks();
                    let fallback = match ctx.status() {
                        StatusCode::NOT_FOUND => Some(Arc::clone(&fallbacks.not_found)),
                        StatusCode::METHOD_NOT_ALLOWED => {
                            Some(Arc::clone(&fallbacks.method_not_allowed))
                        }
                        _ => None,
                    };
                    if let Some(fallback) = fallback {
                        let _ = ctx.take_error();
                        return fallback(ctx).await;
                    }
                }

                ctx.take_error()
            })
        })
    }
}

/// Root-only stage: hand any error coming out of the chain to the error handler.
fn resolve_errors(next: HandlerFunc) -> HandlerFunc {
    handler_fn(move |ctx| {
        let next = Arc::clone(&next);
        Box::pin(async move {
            if let Err(err) = next(ctx).await {
                ctx.report_error(err);
            }
            Ok(())
        })
    })
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let middlewares = self
            .inner
            .middlewares
            .lock()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("Router")
            .field("root", &self.inner.root)
            .field("routes", &self.inner.table.load().len())
            .field("middlewares", &middlewares)
            .field("built", &self.is_built())
            .finish()
    }
}
