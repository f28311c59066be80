//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (axum/hyper)
//!     → server.rs (collect body, build Context)
//!     → engine.rs (group middleware + route lookup)
//!     → chain.rs (drive handlers through Next)
//!         → middleware/ (timeout, shed, recovery, trace, rate limit)
//!         → route endpoint
//!     → context.rs (accumulated response → HTTP response)
//!     → Send to client
//! ```

pub mod chain;
pub mod context;
pub mod engine;
pub mod middleware;
pub mod server;

pub use chain::{handler_fn, middleware_fn, run_chain, BoxHandler, Flow, Handler, Next};
pub use context::{Context, WorkContext};
pub use engine::{Engine, RouterGroup};
pub use server::HttpServer;
