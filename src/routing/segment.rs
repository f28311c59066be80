//! Path segment parsing.
//!
//! # Responsibilities
//! - Turn a registered pattern into typed segments
//! - Split a concrete request path into its non-empty parts
//!
//! # Design Decisions
//! - Sigils (`:name`, `*name`) are resolved once at registration, matching
//!   works on the tagged variants only
//! - Empty segments (leading, trailing or doubled slashes) are dropped
//! - Nothing after a wildcard is kept; the wildcard owns the remainder

use std::fmt;

/// One segment of a registered route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// `:name`, matches any single segment.
    Param(String),
    /// `*name`, matches one or more trailing segments.
    Wildcard(String),
}

impl Segment {
    /// Parse a single non-empty raw segment.
    pub fn parse(raw: &str) -> Self {
        if let Some(name) = raw.strip_prefix(':') {
            Segment::Param(name.to_string())
        } else if let Some(name) = raw.strip_prefix('*') {
            Segment::Wildcard(name.to_string())
        } else {
            Segment::Literal(raw.to_string())
        }
    }

    /// True for parameter and wildcard segments.
    pub fn is_wild(&self) -> bool {
        !matches!(self, Segment::Literal(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard(_))
    }

    /// Whether this (literal) segment equals the given path part.
    pub fn is_literal(&self, part: &str) -> bool {
        matches!(self, Segment::Literal(text) if text == part)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(text) => write!(f, "{}", text),
            Segment::Param(name) => write!(f, ":{}", name),
            Segment::Wildcard(name) => write!(f, "*{}", name),
        }
    }
}

/// Parse a pattern into segments, stopping after the first wildcard.
pub fn parse_pattern(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for raw in pattern.split('/').filter(|s| !s.is_empty()) {
        let segment = Segment::parse(raw);
        let stop = segment.is_wildcard();
        segments.push(segment);
        if stop {
            break;
        }
    }
    segments
}

/// Split a concrete request path into non-empty parts.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
