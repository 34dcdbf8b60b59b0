//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch, upgrade path, bundled middleware, server host:
//!     → tracing events (structured fields)
//!     → logging.rs subscriber (EnvFilter → pretty | JSON on stdout)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the `request_id` middleware
//! - The library only emits events; installing a subscriber is the binary's job

pub mod logging;

pub use logging::init_logging;
