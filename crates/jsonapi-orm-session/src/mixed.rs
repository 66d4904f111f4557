//! Heterogeneous collections.
//!
//! Included resource graphs flatten records of unrelated models into one
//! list. They are resolved by partitioning on the model and running the
//! batched resolver once per partition and relationship.

use crate::resolver::BatchResolver;
use jsonapi_orm_core::{Error, KeyValue, Record, RelationshipDescriptor, Result};
use jsonapi_orm_query::QueryExecutor;
use std::collections::HashSet;

/// Group records by model, keeping the order in which models first appear.
pub(crate) fn partition_by_model<'r, I>(records: I) -> Vec<(String, Vec<&'r mut Record>)>
where
    I: IntoIterator<Item = &'r mut Record>,
{
    let mut groups: Vec<(String, Vec<&'r mut Record>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(model, _)| model == record.model()) {
            Some((_, group)) => group.push(record),
            None => groups.push((record.model().to_string(), vec![record])),
        }
    }
    groups
}

impl<'a, E: QueryExecutor> BatchResolver<'a, E> {
    /// Resolve the optimizable relationships of every record.
    ///
    /// Records may belong to any number of models; each model's records are
    /// resolved together, so the cost is one query per relationship per
    /// model rather than per record.
    #[tracing::instrument(level = "debug", skip_all, fields(records = records.len()))]
    pub fn resolve_mixed(&mut self, records: &mut [Record]) -> Result<()> {
        let groups = partition_by_model(records.iter_mut());
        tracing::debug!(models = groups.len(), "Partitioned mixed collection");
        for (model, mut group) in groups {
            for descriptor in self.optimizable(&model)? {
                self.resolve_refs(&mut group, descriptor)?;
            }
        }
        Ok(())
    }

    /// Resolve the optimizable relationships of a single-model collection.
    pub fn resolve_collection(&mut self, records: &mut [Record]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let model = first.model().to_string();
        for descriptor in self.optimizable(&model)? {
            self.resolve(records, descriptor)?;
        }
        Ok(())
    }

    /// Relationships resolved eagerly for `model`, in declaration order:
    /// every configured relationship backed by a relation, or every declared
    /// relationship when the model has no resource configuration.
    fn optimizable(&self, model: &str) -> Result<Vec<&'a RelationshipDescriptor>> {
        let registry = self.registry();
        let Some(resource) = self.config().resource_config(model) else {
            return Ok(registry
                .model(model)
                .map(|def| def.descriptors.iter().collect())
                .unwrap_or_default());
        };

        let mut descriptors: Vec<&'a RelationshipDescriptor> = Vec::new();
        for (name, config) in &resource.relationships {
            let Some(relation) = config.relation.as_deref() else {
                continue;
            };
            let descriptor = registry.descriptor(model, relation).ok_or_else(|| {
                Error::configuration(format!(
                    "Relationship {name} of {model} maps to undefined relation {relation}"
                ))
            })?;
            if !descriptors.iter().any(|d| d.name == descriptor.name) {
                descriptors.push(descriptor);
            }
        }
        // Declaration order, not the alphabetical order of the config map.
        if let Some(def) = registry.model(model) {
            descriptors.sort_by_key(|d| {
                def.descriptors.iter().position(|declared| declared.name == d.name)
            });
        }
        Ok(descriptors)
    }

    /// Flatten the loaded relationship slots of `records` into an included
    /// set for controller `action`.
    ///
    /// Nested slots are walked recursively. Every resource appears once, and
    /// never when it is already one of `records`. Relationships whose
    /// configuration excludes `action` are skipped together with everything
    /// below them.
    pub fn collect_included(&self, records: &[Record], action: &str) -> Vec<Record> {
        let mut seen: HashSet<(String, KeyValue)> = records.iter().filter_map(|r| self.identity(r)).collect();
        let mut included = Vec::new();
        for record in records {
            self.collect_into(record, action, &mut seen, &mut included);
        }
        tracing::debug!(action = action, included = included.len(), "Collected included resources");
        included
    }

    fn collect_into(
        &self,
        record: &Record,
        action: &str,
        seen: &mut HashSet<(String, KeyValue)>,
        included: &mut Vec<Record>,
    ) {
        for (name, slot) in record.relations() {
            if !self.exposed_for(record.model(), name, action) {
                continue;
            }
            for related in slot.iter() {
                if let Some(identity) = self.identity(related) {
                    if seen.insert(identity) {
                        included.push(related.clone());
                    }
                }
                self.collect_into(related, action, seen, included);
            }
        }
    }

    fn identity(&self, record: &Record) -> Option<(String, KeyValue)> {
        let pk = self
            .registry()
            .model(record.model())
            .map_or("id", |def| def.primary_key.as_str());
        record.key(pk).map(|key| (record.model().to_string(), key))
    }

    /// Whether the relation stored in slot `relation` is included for `action`.
    fn exposed_for(&self, model: &str, relation: &str, action: &str) -> bool {
        let Some(resource) = self.config().resource_config(model) else {
            return true;
        };
        resource
            .relationships
            .iter()
            .filter(|(name, config)| config.relation.as_deref().unwrap_or(name.as_str()) == relation)
            .any(|(_, config)| config.includes_in(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonapi_orm_core::{ApiConfig, ModelDef, RelationshipConfig, ResourceConfig, TypeRegistry, Value};
    use jsonapi_orm_memory::{MemoryStore, row};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_model(
                ModelDef::new("Post", "posts")
                    .relationship(RelationshipDescriptor::morph_many("comments", "Comment", "commentable"))
                    .relationship(RelationshipDescriptor::belongs_to("author", "User", "user_id")),
            )
            .unwrap()
            .with_model(
                ModelDef::new("Video", "videos")
                    .relationship(RelationshipDescriptor::morph_many("comments", "Comment", "commentable")),
            )
            .unwrap()
            .with_model(
                ModelDef::new("Comment", "comments")
                    .relationship(RelationshipDescriptor::belongs_to("author", "User", "user_id")),
            )
            .unwrap()
            .with_model(ModelDef::new("User", "users"))
            .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed("users", [row([("id", 1)]), row([("id", 2)])]);
        store.seed(
            "comments",
            [
                comment(1, "Post", 10, 2),
                comment(2, "Video", 10, 1),
                comment(3, "Post", 11, 2),
            ],
        );
        store
    }

    fn comment(id: i32, commentable_type: &str, commentable_id: i32, user_id: i32) -> jsonapi_orm_query::Row {
        row([
            ("id", Value::from(id)),
            ("commentable_type", Value::from(commentable_type)),
            ("commentable_id", Value::from(commentable_id)),
            ("user_id", Value::from(user_id)),
        ])
    }

    fn mixed() -> Vec<Record> {
        vec![
            Record::persisted("Post").with("id", 10).with("user_id", 1),
            Record::persisted("Video").with("id", 10),
            Record::persisted("Post").with("id", 11).with("user_id", 2),
        ]
    }

    #[test]
    fn partitions_in_first_seen_order() {
        let mut records = mixed();
        let groups = partition_by_model(records.iter_mut());
        let shape: Vec<_> = groups.iter().map(|(m, g)| (m.as_str(), g.len())).collect();
        assert_eq!(shape, vec![("Post", 2), ("Video", 1)]);
    }

    #[test]
    fn one_query_per_relationship_per_model() {
        let (config, registry, store) = (ApiConfig::default(), registry(), store());
        let mut records = mixed();
        let mut resolver = BatchResolver::new(&config, &registry, &store);

        resolver.resolve_mixed(&mut records).unwrap();

        // Post: comments + author, Video: comments
        assert_eq!(store.select_count(), 3);
        assert_eq!(records[0].related_many("comments").len(), 1);
        assert_eq!(records[1].related_many("comments")[0].key("id"), Some(KeyValue::Int(2)));
        assert_eq!(records[2].related_one("author").and_then(|a| a.key("id")), Some(KeyValue::Int(2)));
        assert_eq!(resolver.tracker().stats().relationships_loaded, 3);
    }

    #[test]
    fn configured_relationships_only() {
        let config = ApiConfig::default().resource(
            "Post",
            ResourceConfig::new("posts")
                .relationship(RelationshipDescriptor::morph_many("comments", "Comment", "commentable"))
                .relationship_config("writer", RelationshipConfig::for_relation("author")),
        );
        let (registry, store) = (registry(), store());
        let mut posts = vec![mixed().remove(0)];
        let mut resolver = BatchResolver::new(&config, &registry, &store);

        resolver.resolve_collection(&mut posts).unwrap();
        assert_eq!(store.select_count(), 2);
        assert!(posts[0].relation_loaded("author"));

        let broken = ApiConfig::default().resource(
            "Post",
            ResourceConfig::new("posts").relationship_config("ghost", RelationshipConfig::for_relation("nope")),
        );
        let mut resolver = BatchResolver::new(&broken, &registry, &store);
        let err = resolver.resolve_collection(&mut posts).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn configured_relationships_resolve_in_declaration_order() {
        let config = ApiConfig::default().resource(
            "Post",
            ResourceConfig::new("posts")
                .relationship_config("zz_comments", RelationshipConfig::for_relation("comments"))
                .relationship_config("aa_author", RelationshipConfig::for_relation("author")),
        );
        let (registry, store) = (registry(), store());
        let mut posts = vec![mixed().remove(0)];
        let mut resolver = BatchResolver::new(&config, &registry, &store);

        resolver.resolve_collection(&mut posts).unwrap();

        let tables: Vec<_> = store.statements().into_iter().map(|s| s.table).collect();
        assert_eq!(tables, vec!["comments", "users"]);
    }

    #[test]
    fn included_set_is_flat_and_unique() {
        let (config, registry, store) = (ApiConfig::default(), registry(), store());
        let mut records = mixed();
        let mut resolver = BatchResolver::new(&config, &registry, &store);
        resolver.resolve_mixed(&mut records).unwrap();

        let mut comments: Vec<Record> = records
            .iter()
            .flat_map(|r| r.related_many("comments").iter().cloned())
            .collect();
        resolver.resolve_mixed(&mut comments).unwrap();
        for record in &mut records {
            if let Some(jsonapi_orm_core::RelationSlot::Many(slot)) = record.relation_mut("comments") {
                for comment in slot.iter_mut() {
                    let resolved = comments.iter().find(|c| c.key("id") == comment.key("id")).unwrap();
                    *comment = resolved.clone();
                }
            }
        }

        let included = resolver.collect_included(&records, "index");
        let identities: Vec<_> = included
            .iter()
            .map(|r| format!("{}:{}", r.model(), r.key("id").unwrap()))
            .collect();
        assert_eq!(identities, vec!["User:1", "Comment:1", "User:2", "Comment:2", "Comment:3"]);
    }

    #[test]
    fn included_respects_action_lists() {
        let config = ApiConfig::default().resource(
            "Post",
            ResourceConfig::new("posts")
                .relationship(RelationshipDescriptor::belongs_to("author", "User", "user_id"))
                .relationship_config("author", RelationshipConfig::for_relation("author").included_in(["show"])),
        );
        let (registry, store) = (registry(), store());
        let mut posts = vec![mixed().remove(0)];
        let mut resolver = BatchResolver::new(&config, &registry, &store);
        resolver.resolve_collection(&mut posts).unwrap();

        assert!(resolver.collect_included(&posts, "index").is_empty());
        assert_eq!(resolver.collect_included(&posts, "show").len(), 1);
    }
}
