//! Middleware bundled with the mux.
//!
//! Each constructor returns a [`MiddlewareFunc`](crate::handler::MiddlewareFunc)
//! for `use_middleware`. Order matters: register `recover` first so it
//! wraps everything below it.
//!
//! ```text
//! mux.use_middleware(middleware::recover());
//! mux.use_middleware(middleware::request_id());
//! mux.use_middleware(middleware::logger());
//! ```

pub mod logger;
pub mod recover;
pub mod request_id;

pub use logger::logger;
pub use recover::recover;
pub use request_id::{request_id, RequestId, RequestIdExt, X_REQUEST_ID};
