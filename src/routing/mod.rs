//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     method + pattern
//!     → segment.rs (parse into Literal / Param / Wildcard)
//!     → trie.rs (insert under the method's root)
//!     → table.rs (store handler under (method, pattern))
//!
//! Incoming Request (method, path):
//!     → segment.rs (split path)
//!     → trie.rs (literal-first search with backtracking)
//!     → table.rs (bind params, fetch handler)
//!     → Return: RouteMatch or None
//! ```
//!
//! # Design Decisions
//! - Routes are registered before serving and immutable afterwards
//! - Exact segments beat parameters, parameters are tried in insertion order
//! - Duplicate (method, pattern) is a startup error, not a silent overwrite

use std::collections::HashMap;

use axum::http::Method;

pub mod segment;
pub mod table;
pub mod trie;

pub use segment::Segment;
pub use table::{RouteMatch, RouteTable};

/// Path parameters bound from a matched pattern.
pub type Params = HashMap<String, String>;

/// Route registration errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route {method} {pattern} conflicts with already registered {existing}")]
    Duplicate {
        method: Method,
        pattern: String,
        existing: String,
    },

    #[error("invalid route pattern '{pattern}': must start with '/'")]
    InvalidPattern { pattern: String },

    #[error("invalid static root {root}: {source}")]
    StaticRoot {
        root: String,
        #[source]
        source: std::io::Error,
    },
}
