//! Page arithmetic and link sets.
//!
//! Primary collections know their total (one COUNT query). Relationship
//! listings skip the COUNT: their `next` link is either optimistic (emitted
//! whenever the fetched page is non-empty) or, when the request context asks
//! for it, backed by fetching one extra row.

use crate::context::RequestContext;
use jsonapi_orm_core::ApiConfig;
use serde::Serialize;
use serde_json::{Map, Value as Json};

/// What is known about the size of the paginated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalCount {
    Known(u64),
    /// No COUNT was issued; `next` is emitted whenever the page is non-empty.
    Unknown,
    /// No COUNT was issued, but an extra row was fetched to see whether
    /// another page exists.
    LookAhead { has_more: bool },
}

/// Default and maximum page size for one kind of listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl PageBounds {
    /// Bounds for primary collections.
    pub fn primary(config: &ApiConfig) -> Self {
        Self {
            default_limit: config.result_limit,
            max_limit: config.maximum_result_limit,
        }
    }

    /// Bounds for relationship listings.
    pub fn relationship(config: &ApiConfig) -> Self {
        Self {
            default_limit: config.relationship_result_limit,
            max_limit: config.relationship_maximum_result_limit,
        }
    }
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// Read raw `page`/`limit` query parameters.
    ///
    /// A missing, unparsable, or sub-1 page becomes 1. A limit outside
    /// `1..=max_limit` falls back to the default.
    pub fn from_query(page: Option<&str>, limit: Option<&str>, bounds: PageBounds) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .map_or(1, |p| u64::try_from(p).unwrap_or(1).max(1));
        let limit = limit
            .and_then(|l| l.trim().parse::<u64>().ok())
            .filter(|l| (1..=bounds.max_limit).contains(l))
            .unwrap_or(bounds.default_limit);
        Self::new(page, limit)
    }

    /// Relationship listing page for this request: the context's custom
    /// limit (capped at the configured maximum) or the configured default.
    pub fn for_relationship(ctx: &RequestContext, config: &ApiConfig) -> Self {
        let limit = ctx.limit_override().map_or(config.relationship_result_limit, |limit| {
            limit.min(config.relationship_maximum_result_limit)
        });
        Self::new(ctx.page(), limit)
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// `ceil(total / limit)`, never below 1.
pub fn last_page(total: u64, limit: u64) -> u64 {
    total.div_ceil(limit.max(1)).max(1)
}

/// Page numbers of the pagination links of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSet {
    pub current: u64,
    pub limit: u64,
    pub first: Option<u64>,
    pub prev: Option<u64>,
    pub next: Option<u64>,
    pub last: Option<u64>,
}

/// Compute the link set of page `page` of size `limit`.
///
/// `fetched` is the number of records on the page, used by
/// [`TotalCount::Unknown`].
pub fn paginate(page: u64, limit: u64, total: TotalCount, fetched: usize) -> LinkSet {
    let page = page.max(1);
    let limit = limit.max(1);
    // No next link past the last representable page.
    let following = page.checked_add(1);
    let (next, last) = match total {
        TotalCount::Known(total) => {
            let last = last_page(total, limit);
            (following.filter(|_| page < last), Some(last))
        }
        TotalCount::Unknown => (following.filter(|_| fetched > 0), None),
        TotalCount::LookAhead { has_more } => (following.filter(|_| has_more), None),
    };
    LinkSet {
        current: page,
        limit,
        first: (page > 1).then_some(1),
        prev: (page > 1).then_some(page - 1),
        next,
        last,
    }
}

impl LinkSet {
    /// Render the links as a JSON:API `links` object against `base_url`.
    pub fn to_urls(&self, base_url: &str) -> Json {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let url = |page: u64| {
            Json::String(format!(
                "{base_url}{separator}page={page}&limit={}",
                self.limit
            ))
        };
        let mut links = Map::new();
        links.insert("self".to_string(), url(self.current));
        let optional = [
            ("first", self.first),
            ("prev", self.prev),
            ("next", self.next),
            ("last", self.last),
        ];
        for (name, page) in optional {
            if let Some(page) = page {
                links.insert(name.to_string(), url(page));
            }
        }
        Json::Object(links)
    }
}

/// `meta.pagination` of a primary collection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub current_page: u64,
    pub last_page: u64,
    pub per_page: u64,
    pub total: u64,
}

impl PageMeta {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Self {
            current_page: request.page,
            last_page: last_page(total, request.limit),
            per_page: request.limit,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_page_of_three() {
        let links = paginate(1, 20, TotalCount::Known(45), 20);
        assert_eq!(links.last, Some(3));
        assert_eq!(links.next, Some(2));
        assert_eq!(links.prev, None);
        assert_eq!(links.first, None);
    }

    #[test]
    fn last_page_of_three() {
        let links = paginate(3, 20, TotalCount::Known(45), 5);
        assert_eq!(links.next, None);
        assert_eq!(links.prev, Some(2));
        assert_eq!(links.first, Some(1));
        assert_eq!(links.last, Some(3));
    }

    #[test]
    fn largest_page_has_no_next_link() {
        let links = paginate(u64::MAX, 20, TotalCount::Unknown, 5);
        assert_eq!(links.next, None);
        assert_eq!(links.prev, Some(u64::MAX - 1));
        let links = paginate(u64::MAX, 20, TotalCount::LookAhead { has_more: true }, 20);
        assert_eq!(links.next, None);
        assert_eq!(PageRequest::new(u64::MAX, 20).offset(), u64::MAX);
    }

    #[test]
    fn empty_total_has_one_page() {
        assert_eq!(last_page(0, 20), 1);
        assert_eq!(last_page(40, 20), 2);
        assert_eq!(last_page(41, 20), 3);
        let links = paginate(1, 20, TotalCount::Known(0), 0);
        assert_eq!(links.last, Some(1));
        assert_eq!(links.next, None);
    }

    #[test]
    fn unknown_total_is_optimistic() {
        let links = paginate(2, 10, TotalCount::Unknown, 3);
        assert_eq!(links.next, Some(3));
        assert_eq!(links.last, None);
        assert_eq!(paginate(2, 10, TotalCount::Unknown, 0).next, None);
    }

    #[test]
    fn look_ahead_total_only_links_existing_pages() {
        assert_eq!(paginate(1, 10, TotalCount::LookAhead { has_more: false }, 10).next, None);
        assert_eq!(paginate(1, 10, TotalCount::LookAhead { has_more: true }, 10).next, Some(2));
    }

    #[test]
    fn from_query_clamps() {
        let bounds = PageBounds {
            default_limit: 20,
            max_limit: 100,
        };
        assert_eq!(PageRequest::from_query(None, None, bounds), PageRequest::new(1, 20));
        assert_eq!(
            PageRequest::from_query(Some("-3"), Some("0"), bounds),
            PageRequest::new(1, 20)
        );
        assert_eq!(
            PageRequest::from_query(Some("4"), Some("500"), bounds),
            PageRequest::new(4, 20)
        );
        let request = PageRequest::from_query(Some("3"), Some("50"), bounds);
        assert_eq!(request, PageRequest::new(3, 50));
        assert_eq!(request.offset(), 100);
        assert_eq!(PageRequest::from_query(Some("x"), Some("y"), bounds).page, 1);
    }

    #[test]
    fn relationship_limits_come_from_context() {
        let config = ApiConfig::default().relationship_limits(10, 30);
        let request = PageRequest::for_relationship(&RequestContext::new(), &config);
        assert_eq!(request, PageRequest::new(1, 10));

        let ctx = RequestContext::new().relationship_page(2).custom_limit(50);
        let request = PageRequest::for_relationship(&ctx, &config);
        assert_eq!(request, PageRequest::new(2, 30));
        assert_eq!(request.offset(), 30);
    }

    #[test]
    fn links_render_as_urls() {
        let links = paginate(2, 20, TotalCount::Known(45), 20);
        assert_eq!(
            links.to_urls("/api/posts"),
            json!({
                "self": "/api/posts?page=2&limit=20",
                "first": "/api/posts?page=1&limit=20",
                "prev": "/api/posts?page=1&limit=20",
                "next": "/api/posts?page=3&limit=20",
                "last": "/api/posts?page=3&limit=20"
            })
        );
        let links = paginate(1, 5, TotalCount::Unknown, 0);
        assert_eq!(
            links.to_urls("/api/posts/1/comments?sort=id"),
            json!({"self": "/api/posts/1/comments?sort=id&page=1&limit=5"})
        );
    }

    #[test]
    fn page_meta_serializes() {
        let meta = PageMeta::new(PageRequest::new(2, 20), 45);
        assert_eq!(
            serde_json::to_value(meta).unwrap(),
            json!({"current_page": 2, "last_page": 3, "per_page": 20, "total": 45})
        );
    }
}
