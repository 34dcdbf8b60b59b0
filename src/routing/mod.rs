//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → mux.rs (root: error resolution, fallbacks)
//!     → router.rs (middleware chain, lazily built)
//!     → table.rs (pattern lookup, pattern.rs grammar)
//!     → handler | mounted Router | file service (files.rs)
//!     ← miss: sentinel 404/405 → fallback.rs at the root
//! ```
//!
//! # Design Decisions
//! - Tables are immutable snapshots swapped with `arc-swap`
//! - No regex in hot path (exact and prefix matching only)
//! - Deterministic: the most specific pattern wins, regardless of order
//! - Only a root resolves misses and errors; inline routers pass them up

pub(crate) mod files;
pub mod fallback;
pub mod mux;
pub mod pattern;
pub mod router;
pub mod table;

pub use fallback::{default_error_handler, default_method_not_allowed, default_not_found, Fallbacks};
pub use mux::Mux;
pub use router::Router;
