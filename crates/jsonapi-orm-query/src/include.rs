//! `include` parameter parsing.
//!
//! `?include=author,comments.author` asks for compound documents. Paths are
//! merged into a tree so every relationship level is resolved once per
//! level, no matter how many paths share a prefix.

use jsonapi_orm_core::{Error, Result};

/// A relationship to include, with nested relationships to load on the
/// related records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludePath {
    /// Relationship name on the parent.
    pub relationship: String,
    /// Nested relationships to load.
    pub nested: Vec<IncludePath>,
}

impl IncludePath {
    /// Create a new include path for a single relationship.
    #[must_use]
    pub fn new(relationship: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            nested: Vec::new(),
        }
    }

    /// Add a nested relationship to load.
    #[must_use]
    pub fn nest(mut self, path: IncludePath) -> Self {
        self.nested.push(path);
        self
    }

    /// Depth of the deepest path below (and including) this one.
    pub fn depth(&self) -> usize {
        1 + self.nested.iter().map(IncludePath::depth).max().unwrap_or(0)
    }

    fn insert(paths: &mut Vec<IncludePath>, segments: &[&str]) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let index = match paths.iter().position(|p| p.relationship == *first) {
            Some(index) => index,
            None => {
                paths.push(IncludePath::new(*first));
                paths.len() - 1
            }
        };
        Self::insert(&mut paths[index].nested, rest);
    }
}

/// Parse an `include` parameter into a merged path tree.
///
/// Paths deeper than `max_depth` are rejected.
pub fn parse_include(input: &str, max_depth: usize) -> Result<Vec<IncludePath>> {
    let mut paths = Vec::new();
    for raw in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::validation(format!("Invalid include path ({raw})")));
        }
        if segments.len() > max_depth {
            return Err(Error::validation(format!(
                "Include path ({raw}) is too deep. Maximum depth: {max_depth}"
            )));
        }
        IncludePath::insert(&mut paths, &segments);
    }
    Ok(paths)
}
