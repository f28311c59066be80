//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives (trace id already assigned)
//!     → rate_limit.rs (global token bucket)
//!     → Allowed: continue to group middleware and the route
//!     → Denied: 400 {"message":"request rate limit exceeded"}
//! ```
//!
//! # Design Decisions
//! - Rejections are expected traffic: debug log and a metric, no error log
//! - A zero ceiling disables the limiter

pub mod rate_limit;

pub use rate_limit::{RateLimit, RateLimiter};
