//! Prefix tree over path segments.
//!
//! # Responsibilities
//! - Store registered patterns, one node per distinct segment per level
//! - Resolve a split request path to the node that terminates a pattern
//!
//! # Design Decisions
//! - Children keep insertion order; literal children are always tried
//!   before wild ones so `/user/profile` beats `/user/:id`
//! - Search backtracks: a literal branch that dead-ends falls back to the
//!   wild siblings
//! - A wildcard node ends the walk regardless of remaining depth

use crate::routing::segment::Segment;

/// Returned when a pattern lands on a node that already terminates another
/// registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupied {
    pub existing: String,
}

/// A single trie node.
#[derive(Debug, Clone)]
pub struct Node {
    pattern: Option<String>,
    segment: Segment,
    children: Vec<Node>,
}

impl Default for Node {
    fn default() -> Self {
        Self::root()
    }
}

impl Node {
    /// An empty root node.
    pub fn root() -> Self {
        Self::new(Segment::Literal(String::new()))
    }

    fn new(segment: Segment) -> Self {
        Self {
            pattern: None,
            segment,
            children: Vec::new(),
        }
    }

    /// The full pattern terminating at this node, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn is_wild(&self) -> bool {
        self.segment.is_wild()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Insert `pattern`, already split into `parts`, starting at `depth`.
    pub fn insert(&mut self, pattern: &str, parts: &[Segment], depth: usize) -> Result<(), Occupied> {
        if parts.len() == depth {
            if let Some(existing) = &self.pattern {
                return Err(Occupied {
                    existing: existing.clone(),
                });
            }
            self.pattern = Some(pattern.to_string());
            return Ok(());
        }

        let part = &parts[depth];
        let index = match self.children.iter().position(|c| &c.segment == part) {
            Some(index) => index,
            None => {
                self.children.push(Node::new(part.clone()));
                self.children.len() - 1
            }
        };
        self.children[index].insert(pattern, parts, depth + 1)
    }

    /// Find the node terminating a pattern that matches `parts`.
    pub fn search(&self, parts: &[&str], depth: usize) -> Option<&Node> {
        if parts.len() == depth || self.segment.is_wildcard() {
            return self.pattern.as_ref().map(|_| self);
        }

        let part = parts[depth];
        let literal = self.children.iter().filter(|c| c.segment.is_literal(part));
        let wild = self.children.iter().filter(|c| c.is_wild());

        literal
            .chain(wild)
            .find_map(|child| child.search(parts, depth + 1))
    }

    /// Every pattern stored below (and including) this node, depth first.
    pub fn patterns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(pattern) = &self.pattern {
            out.push(pattern);
        }
        for child in &self.children {
            child.collect(out);
        }
    }
}
