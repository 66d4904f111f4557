//! Per-request state.
//!
//! The relationship page and the custom relationship page size are chosen by
//! the caller for one request and threaded explicitly through resolution,
//! writes, and pagination. Nothing here is shared between requests.

/// Request-scoped knobs for relationship listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    relationship_page: u64,
    custom_limit: Option<u64>,
    look_ahead: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            relationship_page: 1,
            custom_limit: None,
            look_ahead: false,
        }
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page of relationship listings to serve; pages below 1 are read as 1.
    #[must_use]
    pub fn relationship_page(mut self, page: u64) -> Self {
        self.relationship_page = page.max(1);
        self
    }

    /// Override the configured relationship page size for this request.
    /// Zero clears the override.
    #[must_use]
    pub fn custom_limit(mut self, limit: u64) -> Self {
        self.custom_limit = (limit > 0).then_some(limit);
        self
    }

    /// Fetch one extra row on relationship listings and only emit a `next`
    /// link when it exists.
    #[must_use]
    pub fn look_ahead(mut self, enabled: bool) -> Self {
        self.look_ahead = enabled;
        self
    }

    pub fn page(&self) -> u64 {
        self.relationship_page
    }

    pub fn limit_override(&self) -> Option<u64> {
        self.custom_limit
    }

    pub fn looks_ahead(&self) -> bool {
        self.look_ahead
    }
}
