//! JSON:API relationship resolution on top of an ORM query layer.
//!
//! `jsonapi-orm` ties the workspace together. Controllers load parent
//! records, then use this crate to:
//!
//! - resolve relationships in batches (one query per relationship per model)
//! - drop records the principal may not see
//! - apply relationship payloads inside one transaction
//! - paginate primary collections and relationship listings
//!
//! # Quick Start
//!
//! ```ignore
//! use jsonapi_orm::prelude::*;
//!
//! let api = JsonApi::from_json_str(include_str!("api.json"))?;
//! let store = MemoryStore::new();
//!
//! // GET /posts?include=author,tags
//! let request = api.page_request(Some("1"), Some("20"));
//! let query = api.collection_query("Post", None, Some("-created_at"))?;
//! let mut page = api.fetch_page(&store, query, request)?;
//! let mut resolver = api.resolver(&store);
//! resolver.include(&mut page.records, &parse_include("author,tags", 3)?)?;
//! let included = resolver.collect_included(&page.records, "index");
//!
//! // POST /posts/1/relationships/tags
//! let payload = RelationshipPayload::from_json("tags", &body)?;
//! api.writer(&store)
//!     .write(&mut post, &[("tags".into(), payload)], &WriteContext::direct(RequestMethod::Post))?;
//! ```
//!
//! # Crates
//!
//! - `jsonapi-orm-core`: values, records, descriptors, registry, config, errors
//! - `jsonapi-orm-query`: batched queries, the executor contract, client parameters
//! - `jsonapi-orm-session`: resolution, authorization, writes, pagination
//! - `jsonapi-orm-memory`: an in-process executor for tests and fixtures

pub use jsonapi_orm_core::{
    ApiConfig, AuthorizationError, ConfigurationError, Error, KeyValue, ModelDef, NotFoundError,
    PivotTable, QueryError, QueryErrorKind, Record, RelationOrder, RelationSlot,
    RelationshipConfig, RelationshipDescriptor, RelationshipKind, ResourceConfig, Result,
    SortDirection, ThroughTable, TypeRegistry, UnsupportedError, ValidationError, Value,
    extract_keys, extract_keys_from,
};
pub use jsonapi_orm_memory::{MemoryStore, Statement, StatementKind};
pub use jsonapi_orm_query::{
    BatchQuery, Column, Expr, FilterComposer, IncludePath, OrderBy, OrderDirection,
    QueryExecutor, Row, SparseFieldsets, parse_include, parse_sort,
};
pub use jsonapi_orm_session::{
    AuthorizationGate, Authorizer, BatchLoadStats, BatchLoadTracker, BatchResolver, LinkSet,
    PageBounds, PageMeta, PageRequest, RelationshipPage, RelationshipPayload, RelationshipWriter,
    RequestContext, RequestMethod, ResourceIdentifier, ResultGroup, Subject, TotalCount,
    WriteContext, WriteEvent, WriteHooks, WriteMode, last_page, paginate,
};

use serde_json::Value as Json;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        ApiConfig, AuthorizationGate, Authorizer, BatchQuery, BatchResolver, CollectionPage,
        Error, JsonApi, KeyValue, LinkSet, MemoryStore, ModelDef, PageRequest, QueryExecutor,
        Record, RelationSlot, RelationshipDescriptor, RelationshipKind, RelationshipPayload,
        RelationshipWriter, RequestContext, RequestMethod, ResourceConfig, ResourceIdentifier,
        Result, Subject, TotalCount, TypeRegistry, Value, WriteContext, WriteMode, paginate,
        parse_include,
    };
}

// ============================================================================
// Collection pages
// ============================================================================

/// One page of a primary collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPage {
    pub records: Vec<Record>,
    pub links: LinkSet,
    pub meta: PageMeta,
}

impl CollectionPage {
    /// `links` and `meta` members of the response document.
    pub fn to_json(&self, base_url: &str) -> Json {
        serde_json::json!({
            "links": self.links.to_urls(base_url),
            "meta": {"pagination": self.meta},
        })
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Loaded API configuration and the type registry built from it.
///
/// Build it once at startup and share it; resolvers and writers borrow it
/// per request.
#[derive(Debug, Clone)]
pub struct JsonApi {
    config: ApiConfig,
    registry: TypeRegistry,
}

impl JsonApi {
    /// Validate `config` and build its registry.
    pub fn from_config(config: ApiConfig) -> Result<Self> {
        config.validate()?;
        let registry = TypeRegistry::from_config(&config)?;
        tracing::info!(models = registry.len(), prefix = %config.prefix, "JSON:API layer ready");
        Ok(Self { config, registry })
    }

    /// Load a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_config(ApiConfig::from_json_str(json)?)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Descriptor behind the relationship `name` of `model`, as exposed to
    /// clients.
    pub fn descriptor(&self, model: &str, name: &str) -> Result<&RelationshipDescriptor> {
        let relation = self
            .config
            .resource_config(model)
            .and_then(|resource| resource.relationships.get(name))
            .and_then(|config| config.relation.as_deref())
            .unwrap_or(name);
        self.registry.descriptor(model, relation).ok_or_else(|| {
            let resource_type = self.registry.resource_type_of(model).unwrap_or(model);
            Error::NotFound(
                NotFoundError::new(resource_type, None)
                    .with_message(format!("Relationship {name} is not found on resource {resource_type}")),
            )
        })
    }

    pub fn resolver<'a, E: QueryExecutor>(&'a self, executor: &'a E) -> BatchResolver<'a, E> {
        BatchResolver::new(&self.config, &self.registry, executor)
    }

    pub fn writer<'a, E: QueryExecutor>(&'a self, executor: &'a E) -> RelationshipWriter<'a, E> {
        RelationshipWriter::new(&self.config, &self.registry, executor)
    }

    /// Gate without a principal; attach one with
    /// [`AuthorizationGate::with_principal`].
    pub fn gate(&self) -> AuthorizationGate<'_> {
        AuthorizationGate::new(&self.config, &self.registry)
    }

    /// Primary collection page from raw `page`/`limit` parameters.
    pub fn page_request(&self, page: Option<&str>, limit: Option<&str>) -> PageRequest {
        PageRequest::from_query(page, limit, PageBounds::primary(&self.config))
    }

    /// `{prefix}/{resource_type}` of a model.
    pub fn resource_url(&self, model: &str) -> Result<String> {
        let def = self.registry.require_model(model)?;
        Ok(format!("{}/{}", self.config.prefix, def.resource_type))
    }

    /// Query over a model's table with the client's `filter` document and
    /// `sort` parameter applied, both checked against the resource's
    /// whitelists.
    pub fn collection_query(
        &self,
        model: &str,
        filter: Option<&Json>,
        sort: Option<&str>,
    ) -> Result<BatchQuery> {
        let def = self.registry.require_model(model)?;
        let resource = self.config.resource_config(model);
        let mut query = BatchQuery::for_model(def);

        if let Some(filter) = filter {
            let composer = FilterComposer::new(
                resource.map(|r| r.filter.clone()).unwrap_or_default(),
                resource.map_or(0, |r| r.max_query_conditions),
            )
            .table(def.table.clone());
            if let Some(expr) = composer.compose(filter)? {
                query = query.filter(expr);
            }
        }
        if let Some(sort) = sort {
            let allowed = resource.map(|r| r.sortable.as_slice()).unwrap_or_default();
            let max_fields = resource.map_or(0, |r| r.max_multiple_sorting);
            for term in parse_sort(sort, &def.table, allowed, max_fields)? {
                query = query.order_by(term);
            }
        }
        Ok(query)
    }

    /// Count `query`, then fetch page `request` of it.
    ///
    /// A page beyond the last one comes back empty with links pointing
    /// back into range.
    pub fn fetch_page<E: QueryExecutor>(
        &self,
        executor: &E,
        query: BatchQuery,
        request: PageRequest,
    ) -> Result<CollectionPage> {
        let total = executor.count(&query)?;
        let records = executor.get(&query.limit(request.limit).offset(request.offset()))?;
        let links = paginate(request.page, request.limit, TotalCount::Known(total), records.len());
        tracing::debug!(
            total = total,
            page = request.page,
            fetched = records.len(),
            "Fetched collection page"
        );
        Ok(CollectionPage {
            records,
            links,
            meta: PageMeta::new(request, total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonapi_orm_memory::row;
    use serde_json::json;

    fn api() -> JsonApi {
        JsonApi::from_config(
            ApiConfig::default().prefix("/api/").resource(
                "Post",
                ResourceConfig::new("posts")
                    .sortable(["title"])
                    .filterable(["status"])
                    .relationship(RelationshipDescriptor::belongs_to("author", "User", "user_id"))
                    .relationship_config("writer", RelationshipConfig::for_relation("author")),
            )
            .resource("User", ResourceConfig::new("users")),
        )
        .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "posts",
            (1..=5).map(|id| {
                row([
                    ("id", Value::from(id)),
                    ("title", Value::from(format!("t{}", 6 - id))),
                    ("status", Value::from(if id % 2 == 0 { "draft" } else { "live" })),
                ])
            }),
        );
        store
    }

    #[test]
    fn descriptors_resolve_through_exposed_names() {
        let api = api();
        assert_eq!(api.descriptor("Post", "writer").unwrap().name, "author");
        assert_eq!(api.descriptor("Post", "author").unwrap().kind, RelationshipKind::BelongsTo);
        let err = api.descriptor("Post", "tags").unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(api.resource_url("Post").unwrap(), "/api/posts");
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let err = JsonApi::from_config(ApiConfig::default().result_limits(0, 10)).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn collection_page_applies_filter_sort_and_limits() {
        let (api, store) = (api(), store());
        let query = api
            .collection_query("Post", Some(&json!({"field": "status", "value": "live"})), Some("title"))
            .unwrap();
        let page = api.fetch_page(&store, query, api.page_request(Some("1"), Some("2"))).unwrap();

        let ids: Vec<_> = page.records.iter().map(|r| r.key("id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["5", "3"]);
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.links.next, Some(2));
        assert_eq!(page.links.last, Some(2));

        let document = page.to_json("/api/posts");
        assert_eq!(document["meta"]["pagination"]["last_page"], 2);
        assert_eq!(document["links"]["next"], "/api/posts?page=2&limit=2");
    }

    #[test]
    fn unlisted_sort_and_filter_fields_are_rejected() {
        let api = api();
        let err = api.collection_query("Post", None, Some("status")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = api
            .collection_query("Post", Some(&json!({"field": "title", "value": "x"})), None)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
