//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum::serve, timeout + trace layers)
//!     → Mux (tower::Service) → pipeline task
//!     → writer.rs (raw writer: head via oneshot, body via channel)
//!       intercept.rs (sentinel-latching view used by the pattern table)
//!     → Send to client
//! ```

pub mod intercept;
pub mod middleware;
pub mod server;
pub mod writer;

pub use server::HttpServer;
