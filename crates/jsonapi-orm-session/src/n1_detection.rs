//! N+1 detection for relationship resolution.
//!
//! Batched resolution issues one query per relationship per related type.
//! The tracker records every resolution and warns when a resolution issued
//! more queries than that, or when the same relationship of the same model
//! keeps being resolved over and over within one scope (usually a loop
//! resolving one parent at a time).
//!
//! ```ignore
//! // Warns after the third call:
//! for post in &mut posts {
//!     resolver.resolve(std::slice::from_mut(post), comments)?;
//! }
//!
//! // One query:
//! resolver.resolve(&mut posts, comments)?;
//! ```

use std::collections::HashMap;

/// Per (parent model, relationship) counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counter {
    resolutions: usize,
    queries: usize,
}

/// Statistics about the batched loads of one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchLoadStats {
    /// Total number of queries issued by resolutions
    pub total_queries: usize,
    /// Number of distinct relationships resolved
    pub relationships_loaded: usize,
    /// Relationships resolved at least `threshold` times
    pub potential_n1: usize,
}

/// Records batched loads and warns about N+1 patterns.
#[derive(Debug)]
pub struct BatchLoadTracker {
    counts: HashMap<(String, String), Counter>,
    threshold: usize,
    enabled: bool,
}

impl Default for BatchLoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchLoadTracker {
    /// Create a tracker with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    /// Warn once a relationship has been resolved this many times.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record one resolution of `relationship` on `parent_model` that issued
    /// `queries` queries for `related_types` distinct related types.
    pub fn record(
        &mut self,
        parent_model: &str,
        relationship: &str,
        queries: usize,
        related_types: usize,
    ) {
        if !self.enabled {
            return;
        }

        let counter = self
            .counts
            .entry((parent_model.to_string(), relationship.to_string()))
            .or_default();
        counter.resolutions += 1;
        counter.queries += queries;
        let resolutions = counter.resolutions;

        if queries > related_types {
            tracing::warn!(
                target: "jsonapi_orm::n1",
                parent = parent_model,
                relationship = relationship,
                queries = queries,
                related_types = related_types,
                "Resolution issued more than one query per related type"
            );
        }
        if resolutions == self.threshold {
            tracing::warn!(
                target: "jsonapi_orm::n1",
                parent = parent_model,
                relationship = relationship,
                resolutions = resolutions,
                threshold = self.threshold,
                "N+1 QUERY PATTERN DETECTED! Resolve the whole collection in one call."
            );
        }
    }

    /// Queries issued so far for one relationship.
    pub fn queries_for(&self, parent_model: &str, relationship: &str) -> usize {
        self.counter(parent_model, relationship).queries
    }

    /// Resolutions recorded so far for one relationship.
    pub fn resolutions_for(&self, parent_model: &str, relationship: &str) -> usize {
        self.counter(parent_model, relationship).resolutions
    }

    fn counter(&self, parent_model: &str, relationship: &str) -> Counter {
        self.counts
            .get(&(parent_model.to_string(), relationship.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> BatchLoadStats {
        BatchLoadStats {
            total_queries: self.counts.values().map(|c| c.queries).sum(),
            relationships_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|c| c.resolutions >= self.threshold)
                .count(),
        }
    }

    /// Clear all counters; call at the start of a request.
    pub fn reset(&mut self) {
        self.counts.clear();
    }
}
