//! Route table: (method, pattern) → handler.
//!
//! # Responsibilities
//! - Own one trie per HTTP method
//! - Reject duplicate registrations at startup
//! - Resolve a request to its pattern, parameters and handler
//!
//! # Design Decisions
//! - Generic over the stored value so matching is testable without handlers
//! - Keyed by the exact pattern string; patterns that collapse onto the same
//!   trie node also count as duplicates
//! - A miss is `None`, never an error

use std::collections::HashMap;

use axum::http::Method;

use crate::routing::segment::{parse_pattern, split_path, Segment};
use crate::routing::trie::Node;
use crate::routing::{Params, RouteError};

/// Result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// The registered pattern that matched.
    pub pattern: &'a str,
    /// Parameters bound positionally from the path.
    pub params: Params,
    /// The value registered for (method, pattern).
    pub value: &'a T,
}

/// Method-partitioned route table.
#[derive(Debug)]
pub struct RouteTable<T> {
    roots: HashMap<Method, Node>,
    handlers: HashMap<(Method, String), T>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self {
            roots: HashMap::new(),
            handlers: HashMap::new(),
        }
    }
}

impl<T> RouteTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` for `method` + `pattern`.
    pub fn insert(&mut self, method: Method, pattern: &str, value: T) -> Result<(), RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }

        let key = (method.clone(), pattern.to_string());
        if self.handlers.contains_key(&key) {
            return Err(RouteError::Duplicate {
                method,
                pattern: pattern.to_string(),
                existing: pattern.to_string(),
            });
        }

        let parts = parse_pattern(pattern);
        if let Some(index) = parts.iter().position(Segment::is_wildcard) {
            if pattern.split('/').filter(|s| !s.is_empty()).count() > index + 1 {
                tracing::warn!(
                    method = %method,
                    pattern = %pattern,
                    "Segments after a wildcard are ignored"
                );
            }
        }

        self.roots
            .entry(method.clone())
            .or_default()
            .insert(pattern, &parts, 0)
            .map_err(|occupied| RouteError::Duplicate {
                method: method.clone(),
                pattern: pattern.to_string(),
                existing: occupied.existing,
            })?;

        self.handlers.insert(key, value);
        Ok(())
    }

    /// Resolve `method` + `path`.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        let root = self.roots.get(method)?;
        let parts = split_path(path);
        let node = root.search(&parts, 0)?;
        let pattern = node.pattern()?;

        let value = self.handlers.get(&(method.clone(), pattern.to_string()))?;
        Some(RouteMatch {
            pattern,
            params: bind_params(pattern, &parts),
            value,
        })
    }

    /// All registered (method, pattern) pairs.
    pub fn routes(&self) -> Vec<(&Method, &str)> {
        self.handlers
            .keys()
            .map(|(method, pattern)| (method, pattern.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Bind `:name` and `*name` segments of `pattern` against the path parts.
fn bind_params(pattern: &str, parts: &[&str]) -> Params {
    let mut params = Params::new();
    for (index, segment) in parse_pattern(pattern).into_iter().enumerate() {
        match segment {
            Segment::Param(name) => {
                if let Some(value) = parts.get(index) {
                    params.insert(name, (*value).to_string());
                }
            }
            Segment::Wildcard(name) => {
                if !name.is_empty() {
                    params.insert(name, parts.get(index..).unwrap_or_default().join("/"));
                }
                break;
            }
            Segment::Literal(_) => {}
        }
    }
    params
}
