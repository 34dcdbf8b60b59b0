//! Pattern dispatch table.
//!
//! # Responsibilities
//! - Store `pattern → handler` entries
//! - Pick the most specific entry for a request
//! - Emit the default miss responses through the intercepting sink
//!
//! # Design Decisions
//! - Immutable once published; registration clones and swaps the table
//! - Misses are written, not returned: 404 and 405 go through the sink so
//!   the root can intercept them, a trailing-slash redirect goes through as-is
//! - The matched handler's result is recorded on the Context

use axum::http::{header, HeaderValue, Method, StatusCode};

use crate::context::Context;
use crate::handler::HandlerFunc;
use crate::routing::pattern::{Pattern, PatternError};

/// Why a registration was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("pattern `{0}` is already registered")]
    Conflict(String),
}

#[derive(Clone)]
struct Route {
    pattern: Pattern,
    handler: HandlerFunc,
}

/// Result of looking a request up in the table.
pub enum Lookup {
    Matched(HandlerFunc),
    MethodNotAllowed(Vec<Method>),
    Redirect,
    NotFound,
}

/// Maps patterns to handlers.
#[derive(Clone, Default)]
pub struct ServeMux {
    routes: Vec<Route>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: &str, handler: HandlerFunc) -> Result<(), RegisterError> {
        let pattern = Pattern::parse(pattern)?;
        if self.routes.iter().any(|r| r.pattern == pattern) {
            return Err(RegisterError::Conflict(pattern.to_string()));
        }
        tracing::debug!(pattern = %pattern, "Route registered");
        self.routes.push(Route { pattern, handler });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let mut best: Option<&Route> = None;
        let mut path_matched = false;

        for route in self.routes.iter().filter(|r| r.pattern.matches_path(path)) {
            path_matched = true;
            if !route.pattern.matches_method(method) {
                continue;
            }
            if best.map_or(true, |b| route.pattern.specificity() > b.pattern.specificity()) {
                best = Some(route);
            }
        }

        if let Some(route) = best {
            return Lookup::Matched(route.handler.clone());
        }

        if path_matched {
            let mut allowed: Vec<Method> = self
                .routes
                .iter()
                .filter(|r| r.pattern.matches_path(path))
                .flat_map(|r| r.pattern.allowed_methods())
                .collect();
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            allowed.dedup();
            return Lookup::MethodNotAllowed(allowed);
        }

        if !path.ends_with('/') {
            let with_slash = format!("{path}/");
            if self
                .routes
                .iter()
                .any(|r| r.pattern.is_subtree() && r.pattern.path() == with_slash)
            {
                return Lookup::Redirect;
            }
        }

        Lookup::NotFound
    }

    /// Dispatch one request and record the handler's result on `ctx`.
    pub async fn serve(&self, ctx: &mut Context) {
        let method = ctx.request().method().clone();
        let path = ctx.request().uri().path().to_string();

        match self.lookup(&method, &path) {
            Lookup::Matched(handler) => {
                let result = handler(ctx).await;
                ctx.record(result);
            }
            Lookup::MethodNotAllowed(allowed) => {
                tracing::debug!(method = %method, path = %path, "Method not allowed");
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sink = ctx.sink();
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    sink.headers_mut().insert(header::ALLOW, value);
                }
                write_plain(&mut sink, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
            }
            Lookup::Redirect => {
                let original = ctx.original_uri().clone();
                let location = match original.query() {
                    Some(query) => format!("{}/?{}", original.path(), query),
                    None => format!("{}/", original.path()),
                };
                tracing::debug!(path = %path, location = %location, "Redirecting to subtree");
                let mut sink = ctx.sink();
                if let Ok(value) = HeaderValue::from_str(&location) {
                    sink.headers_mut().insert(header::LOCATION, value);
                }
                write_plain(&mut sink, StatusCode::MOVED_PERMANENTLY, "");
            }
            Lookup::NotFound => {
                tracing::debug!(method = %method, path = %path, "No route matched");
                write_plain(&mut ctx.sink(), StatusCode::NOT_FOUND, "404 page not found\n");
            }
        }
    }
}

fn write_plain(sink: &mut crate::http::intercept::ResponseSink<'_>, status: StatusCode, body: &'static str) {
    let headers = sink.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    sink.write_header(status);
    let _ = sink.write(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> HandlerFunc {
        handler_fn(|_ctx| Box::pin(async move { Ok(()) }))
    }

    fn tagged(tag: &'static str) -> HandlerFunc {
        handler_fn(move |ctx| {
            Box::pin(async move {
                ctx.response().write(tag)?;
                Ok(())
            })
        })
    }

    fn table(patterns: &[&str]) -> ServeMux {
        let mut mux = ServeMux::new();
        for p in patterns {
            mux.register(p, noop()).unwrap();
        }
        mux
    }

    #[test]
    fn duplicate_pattern_conflicts() {
        let mut mux = table(&["GET /a"]);
        assert_eq!(
            mux.register("GET /a", noop()),
            Err(RegisterError::Conflict("GET /a".into()))
        );
        assert!(mux.register("POST /a", noop()).is_ok());
        assert!(mux.register("/a", noop()).is_ok());
        assert_eq!(mux.len(), 3);
    }

    #[test]
    fn unmatched_path_is_not_found() {
        let mux = table(&["/a", "/b/"]);
        assert!(matches!(mux.lookup(&Method::GET, "/c"), Lookup::NotFound));
        assert!(matches!(mux.lookup(&Method::GET, "/a/"), Lookup::NotFound));
    }

    #[test]
    fn wrong_method_lists_allowed() {
        let mux = table(&["GET /items", "DELETE /items"]);
        match mux.lookup(&Method::POST, "/items") {
            Lookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::DELETE, Method::GET, Method::HEAD]);
            }
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn subtree_without_slash_redirects() {
        let mux = table(&["/api/"]);
        assert!(matches!(mux.lookup(&Method::GET, "/api"), Lookup::Redirect));
        assert!(matches!(mux.lookup(&Method::GET, "/api/x"), Lookup::Matched(_)));
    }

    #[tokio::test]
    async fn longest_pattern_wins() {
        let mut mux = ServeMux::new();
        mux.register("/", tagged("root")).unwrap();
        mux.register("/api/", tagged("api")).unwrap();
        mux.register("/api/users", tagged("users")).unwrap();
        mux.register("GET /api/users", tagged("get-users")).unwrap();

        for (method, path, want) in [
            (Method::GET, "/nothing", "root"),
            (Method::GET, "/api/other", "api"),
            (Method::POST, "/api/users", "users"),
            (Method::GET, "/api/users", "get-users"),
        ] {
            let request = axum::http::Request::builder()
                .method(method)
                .uri(path)
                .body(axum::body::Body::empty())
                .unwrap();
            let (mut ctx, head) = crate::context::test_support::context(request);
            mux.serve(&mut ctx).await;
            drop(ctx);
            let body = axum::body::to_bytes(head.await.unwrap().into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&body[..], want.as_bytes(), "{path}");
        }
    }

    #[tokio::test]
    async fn miss_is_intercepted_and_405_sets_allow() {
        let mux = table(&["GET /only-get"]);
        let request = axum::http::Request::builder()
            .method(Method::PUT)
            .uri("/only-get")
            .body(axum::body::Body::empty())
            .unwrap();
        let (mut ctx, mut head) = crate::context::test_support::context(request);
        mux.serve(&mut ctx).await;

        assert_eq!(ctx.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(ctx.sink_latched());
        assert_eq!(ctx.response().headers()[header::ALLOW], "GET, HEAD");
        assert!(head.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_error_is_recorded() {
        let mut mux = ServeMux::new();
        mux.register(
            "/fail",
            handler_fn(|_ctx| Box::pin(async move { Err(crate::error::BoxError::from("nope")) })),
        )
        .unwrap();
        let (mut ctx, _head) =
            crate::context::test_support::context(crate::context::test_support::get("/fail"));
        mux.serve(&mut ctx).await;
        assert_eq!(ctx.take_error().unwrap_err().to_string(), "nope");
    }
}
