//! API configuration.
//!
//! The configuration is loaded once at startup (usually from JSON) and then
//! shared read-only. Per-request knobs live in the session crate's
//! `RequestContext`, never here.

use crate::error::{Error, Result};
use crate::relationship::RelationshipDescriptor;
use crate::validate::is_valid_resource_type;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Global API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// URL prefix for generated links (no trailing slash)
    pub prefix: String,
    /// Default page size for primary collections
    pub result_limit: u64,
    /// Largest page size a client may request for primary collections
    pub maximum_result_limit: u64,
    /// Default page size for relationship listings
    pub relationship_result_limit: u64,
    /// Largest page size for relationship listings
    pub relationship_maximum_result_limit: u64,
    /// Consult the authorizer; when off every check passes
    pub use_policies: bool,
    /// Run a per-record `view` check after the per-type `viewAny` check
    pub deep_authorization: bool,
    /// Resource configuration keyed by model name
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            result_limit: 20,
            maximum_result_limit: 100,
            relationship_result_limit: 20,
            relationship_maximum_result_limit: 100,
            use_policies: false,
            deep_authorization: false,
            resources: BTreeMap::new(),
        }
    }
}

impl ApiConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: ApiConfig = serde_json::from_str(json)?;
        config.prefix = config.prefix.trim_end_matches('/').to_string();
        for resource in config.resources.values_mut() {
            resource.expose_descriptors();
        }
        config.validate()?;
        tracing::info!(
            resources = config.resources.len(),
            use_policies = config.use_policies,
            "Loaded API configuration"
        );
        Ok(config)
    }

    /// Set the link prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// Set primary collection page size limits.
    #[must_use]
    pub fn result_limits(mut self, default: u64, maximum: u64) -> Self {
        self.result_limit = default;
        self.maximum_result_limit = maximum;
        self
    }

    /// Set relationship listing page size limits.
    #[must_use]
    pub fn relationship_limits(mut self, default: u64, maximum: u64) -> Self {
        self.relationship_result_limit = default;
        self.relationship_maximum_result_limit = maximum;
        self
    }

    /// Enable/disable policy checks.
    #[must_use]
    pub fn use_policies(mut self, enabled: bool) -> Self {
        self.use_policies = enabled;
        self
    }

    /// Enable/disable the per-record view check.
    #[must_use]
    pub fn deep_authorization(mut self, enabled: bool) -> Self {
        self.deep_authorization = enabled;
        self
    }

    /// Add a resource for `model`.
    #[must_use]
    pub fn resource(mut self, model: impl Into<String>, resource: ResourceConfig) -> Self {
        self.resources.insert(model.into(), resource);
        self
    }

    /// Look up the resource configuration of a model.
    pub fn resource_config(&self, model: &str) -> Option<&ResourceConfig> {
        self.resources.get(model)
    }

    /// Check limits, resource types, and relationship descriptors.
    pub fn validate(&self) -> Result<()> {
        if self.result_limit == 0 || self.result_limit > self.maximum_result_limit {
            return Err(Error::configuration(format!(
                "result_limit must be between 1 and maximum_result_limit ({})",
                self.maximum_result_limit
            )));
        }
        if self.relationship_result_limit == 0
            || self.relationship_result_limit > self.relationship_maximum_result_limit
        {
            return Err(Error::configuration(format!(
                "relationship_result_limit must be between 1 and relationship_maximum_result_limit ({})",
                self.relationship_maximum_result_limit
            )));
        }

        let mut seen_types = HashSet::new();
        for (model, resource) in &self.resources {
            if !is_valid_resource_type(&resource.resource_type) {
                return Err(Error::configuration(format!(
                    "Invalid resource type \"{}\" for model {}",
                    resource.resource_type, model
                )));
            }
            if !seen_types.insert(resource.resource_type.as_str()) {
                return Err(Error::configuration(format!(
                    "Resource type \"{}\" is configured more than once",
                    resource.resource_type
                )));
            }
            for descriptor in &resource.descriptors {
                descriptor.validate()?;
            }
        }
        Ok(())
    }
}

/// Configuration of one resource (one model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// JSON:API resource type (e.g. `"posts"`)
    pub resource_type: String,
    /// Backing table; defaults to the resource type
    pub table: Option<String>,
    pub primary_key: String,
    /// Discriminator stored by polymorphic relationships; defaults to the
    /// model name
    pub morph_alias: Option<String>,
    pub fillable: Vec<String>,
    /// Fields clients may sort by
    pub sortable: Vec<String>,
    pub max_multiple_sorting: usize,
    /// Fields clients may filter by
    pub filter: Vec<String>,
    pub max_query_conditions: usize,
    /// Resource-level relationship options keyed by relationship name
    pub relationships: BTreeMap<String, RelationshipConfig>,
    pub descriptors: Vec<RelationshipDescriptor>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            resource_type: String::new(),
            table: None,
            primary_key: "id".to_string(),
            morph_alias: None,
            fillable: Vec::new(),
            sortable: Vec::new(),
            max_multiple_sorting: 2,
            filter: Vec::new(),
            max_query_conditions: 5,
            relationships: BTreeMap::new(),
            descriptors: Vec::new(),
        }
    }
}

impl ResourceConfig {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    #[must_use]
    pub fn morph_alias(mut self, alias: impl Into<String>) -> Self {
        self.morph_alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn sortable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sortable = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn filterable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a relationship and expose it under its own name.
    #[must_use]
    pub fn relationship(mut self, descriptor: RelationshipDescriptor) -> Self {
        self.relationships
            .entry(descriptor.name.clone())
            .or_insert_with(|| RelationshipConfig::for_relation(descriptor.name.clone()));
        self.descriptors.push(descriptor);
        self
    }

    /// Override the options of an exposed relationship.
    #[must_use]
    pub fn relationship_config(mut self, name: impl Into<String>, config: RelationshipConfig) -> Self {
        self.relationships.insert(name.into(), config);
        self
    }

    /// Expose every descriptor no relationship entry refers to under its
    /// own name.
    fn expose_descriptors(&mut self) {
        for descriptor in &self.descriptors {
            let referenced = self.relationships.iter().any(|(name, config)| {
                config.relation.as_deref().unwrap_or(name.as_str()) == descriptor.name
            });
            if !referenced {
                self.relationships.insert(
                    descriptor.name.clone(),
                    RelationshipConfig::for_relation(descriptor.name.clone()),
                );
            }
        }
    }

    /// Table name, falling back to the resource type.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.resource_type)
    }
}

/// Options of one exposed relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    /// Descriptor backing this relationship. Relationships with a relation
    /// are resolved in batches; without one they are left to the document
    /// builder.
    pub relation: Option<String>,
    /// Controller actions that include this relationship; `None` means all
    pub included: Option<Vec<String>>,
    /// Whether clients may write this relationship
    pub write: bool,
    /// Whether before/after write hooks fire
    pub use_observers: bool,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            relation: None,
            included: None,
            write: true,
            use_observers: true,
        }
    }
}

impl RelationshipConfig {
    pub fn for_relation(relation: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            ..Default::default()
        }
    }

    /// Restrict inclusion to the given controller actions.
    #[must_use]
    pub fn included_in<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn writable(mut self, enabled: bool) -> Self {
        self.write = enabled;
        self
    }

    #[must_use]
    pub fn use_observers(mut self, enabled: bool) -> Self {
        self.use_observers = enabled;
        self
    }

    /// Whether the relationship is included for `action`.
    pub fn includes_in(&self, action: &str) -> bool {
        self.included
            .as_ref()
            .is_none_or(|actions| actions.iter().any(|a| a == action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::RelationshipKind;

    #[test]
    fn defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.result_limit, 20);
        assert_eq!(config.maximum_result_limit, 100);
        assert_eq!(config.relationship_result_limit, 20);
        assert_eq!(config.relationship_maximum_result_limit, 100);
        assert!(!config.use_policies);

        let resource = ResourceConfig::new("posts");
        assert_eq!(resource.primary_key, "id");
        assert_eq!(resource.max_multiple_sorting, 2);
        assert_eq!(resource.max_query_conditions, 5);
        assert_eq!(resource.table_name(), "posts");
    }

    #[test]
    fn from_json() {
        let config = ApiConfig::from_json_str(
            r#"{
                "prefix": "/api/v1/",
                "use_policies": true,
                "resources": {
                    "Post": {
                        "resource_type": "posts",
                        "sortable": ["title", "created_at"],
                        "relationships": {
                            "author": {"relation": "author", "included": ["get"]},
                            "tags": {"relation": "tags", "write": false}
                        },
                        "descriptors": [
                            {"name": "author", "kind": "belongs_to", "related_model": "User", "foreign_key": "user_id"},
                            {"name": "tags", "kind": "belongs_to_many", "related_model": "Tag",
                             "pivot": {"table": "post_tag", "foreign_pivot_key": "post_id", "related_pivot_key": "tag_id"}}
                        ]
                    },
                    "User": {"resource_type": "users"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.prefix, "/api/v1");
        let post = config.resource_config("Post").unwrap();
        assert_eq!(post.descriptors[1].kind, RelationshipKind::BelongsToMany);
        assert!(post.relationships["author"].includes_in("get"));
        assert!(!post.relationships["author"].includes_in("collection"));
        assert!(post.relationships["tags"].includes_in("collection"));
        assert!(!post.relationships["tags"].write);
        assert!(post.relationships["tags"].use_observers);
    }

    #[test]
    fn undeclared_descriptors_are_exposed() {
        let config = ApiConfig::from_json_str(
            r#"{"resources": {"Post": {
                "resource_type": "posts",
                "relationships": {"writer": {"relation": "author"}},
                "descriptors": [
                    {"name": "author", "kind": "belongs_to", "related_model": "User", "foreign_key": "user_id"},
                    {"name": "comments", "kind": "has_many", "related_model": "Comment", "foreign_key": "post_id"}
                ]
            }}}"#,
        )
        .unwrap();
        let post = config.resource_config("Post").unwrap();
        assert_eq!(post.relationships.len(), 2);
        assert!(!post.relationships.contains_key("author"));
        assert_eq!(post.relationships["comments"].relation.as_deref(), Some("comments"));
    }

    #[test]
    fn rejects_bad_resource_types_and_duplicates() {
        let err = ApiConfig::default()
            .resource("Post", ResourceConfig::new("blog posts"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("Invalid resource type"));

        let err = ApiConfig::default()
            .resource("Post", ResourceConfig::new("posts"))
            .resource("Article", ResourceConfig::new("posts"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_inconsistent_limits() {
        let err = ApiConfig::default()
            .relationship_limits(200, 100)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(ApiConfig::default().result_limits(0, 10).validate().is_err());
    }

    #[test]
    fn invalid_descriptor_fails_load() {
        let result = ApiConfig::from_json_str(
            r#"{"resources": {"Post": {"resource_type": "posts", "descriptors": [
                {"name": "tags", "kind": "belongs_to_many", "related_model": "Tag"}
            ]}}}"#,
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn relationship_builder_exposes_descriptor() {
        let resource = ResourceConfig::new("users").relationship(RelationshipDescriptor::has_many(
            "posts", "Post", "user_id",
        ));
        assert_eq!(
            resource.relationships["posts"].relation.as_deref(),
            Some("posts")
        );
        assert_eq!(resource.descriptors.len(), 1);
    }
}
