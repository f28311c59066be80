//! Waypoint: request-dispatch core for HTTP services.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum fallback, body, peer)
//!                          │
//!                          ▼
//!                     http::engine ── routing (trie per method)
//!                          │
//!                          ▼
//!                     http::chain  (Next continuation)
//!                          │
//!          ┌───────────────┼──────────────────────────────┐
//!          │ admission stack (http::middleware)           │
//!          │   resilience::timeouts   resilience::shedding│
//!          │   resilience::recovery   observability::tracing
//!          │   security::rate_limit                       │
//!          └───────────────┼──────────────────────────────┘
//!                          ▼
//!                group middleware → route endpoint
//!                          │
//!     Client Response      ▼
//!     ◀────────────── http::context (response → HTTP)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::ServiceConfig;
pub use http::{handler_fn, middleware_fn, Context, Engine, Flow, Handler, HttpServer, Next};
pub use lifecycle::Shutdown;
pub use routing::RouteError;
