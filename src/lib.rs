//! Request dispatch for HTTP services.
//!
//! A [`Mux`] is a root router: it threads one mutable [`Context`] per request
//! through an ordered middleware chain, a pattern table, nested [`Router`]s
//! and, when nothing matched, its fallback handlers. Errors returned by
//! handlers are converted to a response in exactly one place.
//!
//! ```ignore
//! let mux = Mux::new();
//! mux.use_middleware(middleware::logger());
//! mux.handle("GET /hello", |ctx| Box::pin(async move {
//!     ctx.response().write("hello")?;
//!     Ok(())
//! }));
//! mux.route("/api", |api| {
//!     api.handle("/users", |ctx| Box::pin(async move {
//!         Err(HttpError::new(StatusCode::BAD_REQUEST, "bad input").into())
//!     }));
//! });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod websocket;

pub use http::middleware;

pub use config::ServerConfig;
pub use context::Context;
pub use error::{BoxError, ConnectionError, HttpError, UpgradeError, WebSocketError};
pub use handler::{compose, handler_fn, middleware_fn, HandlerFunc, HandlerResult, MiddlewareFunc};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{Fallbacks, Mux, Router};
pub use websocket::{websocket_fn, WebSocketConn, WebSocketContext, WebSocketFunc};
